//! Terrain cell loading with deduplication and a bounded in-flight window.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use lootrush_shared::geometry::BlockPos;
use lootrush_shared::model::RegionId;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;

use crate::error::TerrainError;
use crate::host::Terrain;

/// One loadable terrain column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub region: RegionId,
    pub cell_x: i32,
    pub cell_z: i32,
}

impl ChunkKey {
    pub fn new(region: RegionId, cell_x: i32, cell_z: i32) -> Self {
        Self {
            region,
            cell_x,
            cell_z,
        }
    }

    pub fn containing(region: RegionId, pos: BlockPos) -> Self {
        Self::new(region, pos.cell_x(), pos.cell_z())
    }

    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self::new(self.region, self.cell_x + dx, self.cell_z + dz)
    }
}

/// Every cell within `radius` of `center`, center included.
pub fn square_around(center: ChunkKey, radius: i32) -> impl Iterator<Item = ChunkKey> {
    (-radius..=radius).flat_map(move |dx| (-radius..=radius).map(move |dz| center.offset(dx, dz)))
}

/// Splits the neighborhoods of `centers` into a near set (within
/// `near_radius` of any center) and a far set (within `far_radius` of any
/// center but in no near neighborhood). The two sets are disjoint.
pub fn partition_waves(
    centers: &[ChunkKey],
    near_radius: i32,
    far_radius: i32,
) -> (Vec<ChunkKey>, Vec<ChunkKey>) {
    let near: BTreeSet<ChunkKey> = centers
        .iter()
        .flat_map(|center| square_around(*center, near_radius))
        .collect();
    let far: BTreeSet<ChunkKey> = centers
        .iter()
        .flat_map(|center| square_around(*center, far_radius))
        .filter(|key| !near.contains(key))
        .collect();
    (near.into_iter().collect(), far.into_iter().collect())
}

type SharedLoad = Shared<BoxFuture<'static, Result<(), TerrainError>>>;

/// Outcome of loading a batch of cells.
#[derive(Debug, Default)]
pub struct WaveSummary {
    pub loaded: usize,
    pub failures: Vec<(ChunkKey, TerrainError)>,
    /// The wave stopped early because the token fired.
    pub cancelled: bool,
}

impl WaveSummary {
    pub fn processed(&self) -> usize {
        self.loaded + self.failures.len()
    }
}

pub struct ChunkLoader {
    terrain: Arc<dyn Terrain>,
    in_flight: Mutex<HashMap<ChunkKey, SharedLoad>>,
    max_in_flight: usize,
}

impl ChunkLoader {
    pub fn new(terrain: Arc<dyn Terrain>, max_in_flight: usize) -> Self {
        Self {
            terrain,
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Load one cell. Concurrent callers for the same key share a single
    /// request to the terrain and all observe its result.
    pub fn load(
        self: &Arc<Self>,
        key: ChunkKey,
    ) -> impl Future<Output = Result<(), TerrainError>> + Send + 'static {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight
            .entry(key)
            .or_insert_with(|| {
                let request = self.terrain.load_chunk(key);
                let owner: Weak<ChunkLoader> = Arc::downgrade(self);
                async move {
                    let result = request.await;
                    if let Some(owner) = owner.upgrade() {
                        owner.retire(key);
                    }
                    result
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    /// Number of distinct cells currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn retire(&self, key: ChunkKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    /// Drop entries for `keys` that nobody is awaiting any more. A load left
    /// behind by a dropped wave is never polled again, so it would never
    /// retire itself.
    fn release_orphans(&self, keys: &[ChunkKey]) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            let orphaned = in_flight
                .get(key)
                .is_some_and(|load| load.strong_count().map_or(true, |count| count <= 1));
            if orphaned {
                in_flight.remove(key);
            }
        }
    }

    /// Load a batch of cells with at most `max_in_flight` outstanding at once.
    /// A new load starts whenever one finishes. `on_done` runs after every
    /// cell, successful or not. Cancellation stops the batch immediately and
    /// abandons its unfinished loads unless another caller shares them.
    pub async fn load_wave<F>(
        self: &Arc<Self>,
        keys: Vec<ChunkKey>,
        cancel: &CancellationToken,
        mut on_done: F,
    ) -> WaveSummary
    where
        F: FnMut(ChunkKey, &Result<(), TerrainError>),
    {
        let mut summary = WaveSummary::default();
        if cancel.is_cancelled() {
            summary.cancelled = true;
            return summary;
        }

        let wave_keys = keys.clone();
        let loader = Arc::clone(self);
        let mut pending = stream::iter(keys)
            .map(move |key| {
                let load = loader.load(key);
                async move { (key, load.await) }
            })
            .buffer_unordered(self.max_in_flight);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some((key, result)) => {
                        on_done(key, &result);
                        match result {
                            Ok(()) => summary.loaded += 1,
                            Err(err) => summary.failures.push((key, err)),
                        }
                    }
                    None => break,
                },
            }
        }
        if summary.cancelled {
            drop(pending);
            self.release_orphans(&wave_keys);
        }
        summary
    }
}
