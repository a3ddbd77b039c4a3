//! Search for one safe, unclaimed standing spot in a huge coordinate space.
//!
//! The search is a bounded loop: sample a candidate, check it against the
//! claims made earlier in the same scatter, load the terrain around it, then
//! inspect the floor/feet/head column. It never fails on bad luck; after the
//! attempt budget runs out it falls back to an offset from the region spawn.

use lootrush_shared::config::GameConfig;
use lootrush_shared::geometry::BlockPos;
use lootrush_shared::model::RegionId;
use lootrush_shared::protocol::Rejection;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chunks::{square_around, ChunkKey, ChunkLoader};
use crate::error::ScatterError;
use crate::host::Terrain;

/// Knobs for a single search, taken from [`GameConfig`].
#[derive(Debug, Clone)]
pub struct PlacementSettings {
    pub min_coord: i32,
    pub max_coord: i32,
    pub min_distance: i32,
    pub attempts: u32,
    pub search_margin: i32,
    pub found_prewarm: i32,
    pub fallback_offset_min: i32,
    pub fallback_offset_max: i32,
}

impl From<&GameConfig> for PlacementSettings {
    fn from(config: &GameConfig) -> Self {
        Self {
            min_coord: config.scatter_min_coord,
            max_coord: config.scatter_max_coord,
            min_distance: config.min_player_distance,
            attempts: config.placement_attempts,
            search_margin: config.search_margin_cells,
            found_prewarm: config.found_prewarm_cells,
            fallback_offset_min: config.fallback_offset_min,
            fallback_offset_max: config.fallback_offset_max,
        }
    }
}

/// A spot already handed out earlier in the same scatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub region: RegionId,
    pub at: BlockPos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Feet position of a verified safe spot.
    Found(BlockPos),
    /// Attempt budget exhausted; unverified spot near the region spawn.
    Fallback(BlockPos),
    Cancelled,
}

/// Signed magnitude in `[min, max]`, sign chosen independently.
pub fn random_coordinate(rng: &mut impl Rng, min: i32, max: i32) -> i32 {
    let base = rng.gen_range(min..=max.max(min));
    if rng.gen_bool(0.5) {
        base
    } else {
        -base
    }
}

/// True unless a claim in the same region lies strictly closer than
/// `min_distance` on the horizontal plane.
pub fn is_far_enough(region: RegionId, x: i32, z: i32, claims: &[Claim], min_distance: i32) -> bool {
    let min_sq = min_distance as i64 * min_distance as i64;
    let candidate = BlockPos::new(x, 0, z);
    claims
        .iter()
        .filter(|claim| claim.region == region)
        .all(|claim| claim.at.horizontal_distance_sq(candidate) >= min_sq)
}

/// Check the column at `(x, z)`. The floor is the block below the surface
/// height; it must be a safe floor with two passable blocks above it.
/// Returns the feet position on success.
pub fn inspect_column(
    terrain: &dyn Terrain,
    region: RegionId,
    x: i32,
    z: i32,
) -> Result<BlockPos, Rejection> {
    let top = terrain
        .surface_height(region, x, z)
        .map_err(|err| Rejection::ChunkLoadFailed {
            x,
            z,
            error: err.to_string(),
        })?;
    let floor_y = top - 1;
    if floor_y < terrain.min_height(region) {
        return Err(Rejection::NoFloor { x, z });
    }

    let floor_pos = BlockPos::new(x, floor_y, z);
    let feet_pos = floor_pos.above(1);
    let head_pos = floor_pos.above(2);
    let floor = terrain.material(region, floor_pos);
    let feet = terrain.material(region, feet_pos);
    let head = terrain.material(region, head_pos);

    if floor.is_safe_floor() && feet.is_passable() && head.is_passable() {
        Ok(feet_pos)
    } else {
        Err(Rejection::UnsafeBlocks {
            at: feet_pos,
            floor: floor.name().to_string(),
            feet: feet.name().to_string(),
            head: head.name().to_string(),
        })
    }
}

/// Spot offset diagonally from `spawn` by a random amount in the configured band.
pub fn fallback_location(spawn: BlockPos, rng: &mut impl Rng, min: i32, max: i32) -> BlockPos {
    let offset = rng.gen_range(min..=max.max(min));
    spawn.offset(offset, 0, offset)
}

/// One placement search bound to a loader and a cancellation token.
pub struct PlacementSearch<'a> {
    settings: &'a PlacementSettings,
    loader: &'a Arc<ChunkLoader>,
    terrain: &'a dyn Terrain,
    cancel: &'a CancellationToken,
}

impl<'a> PlacementSearch<'a> {
    pub fn new(
        settings: &'a PlacementSettings,
        loader: &'a Arc<ChunkLoader>,
        terrain: &'a dyn Terrain,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            settings,
            loader,
            terrain,
            cancel,
        }
    }

    /// Find a spot in `region` far enough from every claim. `on_reject` is
    /// called with the 1-based attempt number for every thrown-away candidate.
    ///
    /// Errors only if the fallback cannot resolve the region spawn.
    pub async fn find<R, F>(
        &self,
        region: RegionId,
        claims: &[Claim],
        rng: &mut R,
        mut on_reject: F,
    ) -> Result<SearchOutcome, ScatterError>
    where
        R: Rng + Send,
        F: FnMut(u32, Rejection) + Send,
    {
        let settings = self.settings;
        for attempt in 1..=settings.attempts {
            if self.cancel.is_cancelled() {
                return Ok(SearchOutcome::Cancelled);
            }

            let x = random_coordinate(rng, settings.min_coord, settings.max_coord);
            let z = random_coordinate(rng, settings.min_coord, settings.max_coord);

            if !is_far_enough(region, x, z, claims, settings.min_distance) {
                tracing::debug!("Attempt {} at ({}, {}) too close to a claim", attempt, x, z);
                on_reject(attempt, Rejection::TooClose { x, z });
                continue;
            }

            let center = ChunkKey::containing(region, BlockPos::new(x, 0, z));
            let margin: Vec<ChunkKey> = square_around(center, settings.search_margin).collect();
            let summary = self.loader.load_wave(margin, self.cancel, |_, _| {}).await;
            if summary.cancelled {
                return Ok(SearchOutcome::Cancelled);
            }
            if let Some((_, err)) = summary.failures.first() {
                tracing::debug!("Attempt {} at ({}, {}): {}", attempt, x, z, err);
                on_reject(
                    attempt,
                    Rejection::ChunkLoadFailed {
                        x,
                        z,
                        error: err.to_string(),
                    },
                );
                continue;
            }

            match inspect_column(self.terrain, region, x, z) {
                Ok(feet) => {
                    if !self.prewarm(center).await {
                        return Ok(SearchOutcome::Cancelled);
                    }
                    return Ok(SearchOutcome::Found(feet));
                }
                Err(rejection) => {
                    tracing::debug!("Attempt {} rejected: {:?}", attempt, rejection);
                    on_reject(attempt, rejection);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(SearchOutcome::Cancelled);
        }
        tracing::warn!(
            "No safe location after {} attempts, falling back to spawn offset",
            settings.attempts
        );
        let spawn = self.terrain.spawn_point(region)?;
        Ok(SearchOutcome::Fallback(fallback_location(
            spawn,
            rng,
            settings.fallback_offset_min,
            settings.fallback_offset_max,
        )))
    }

    /// Load the neighborhood of an accepted spot. Failures are logged and
    /// ignored. Returns false if cancelled.
    async fn prewarm(&self, center: ChunkKey) -> bool {
        let keys: Vec<ChunkKey> = square_around(center, self.settings.found_prewarm).collect();
        let summary = self.loader.load_wave(keys, self.cancel, |_, _| {}).await;
        for (key, err) in &summary.failures {
            tracing::warn!("Pre-warm of ({}, {}) failed: {}", key.cell_x, key.cell_z, err);
        }
        !summary.cancelled
    }
}
