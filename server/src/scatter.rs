//! Scatter pipeline: place every participant, warm the terrain around the
//! chosen spots, then hand the result back to the authority for relocation.
//!
//! A scatter runs as one background task. The engine hands out a generation
//! number per run; the authority ignores completions whose generation is no
//! longer current, so a stopped or restarted round can never be relocated by
//! a late result.

use lootrush_shared::config::GameConfig;
use lootrush_shared::geometry::{BlockPos, Location};
use lootrush_shared::model::{PlayerId, RegionId};
use lootrush_shared::protocol::{Notice, Progress, ProgressLabel, Wave};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunks::{partition_waves, ChunkKey, ChunkLoader};
use crate::error::ScatterError;
use crate::host::{Audience, Notifier, PlayerHost, ProgressSink, Terrain};
use crate::invulnerability::Invulnerability;
use crate::placement::{Claim, PlacementSearch, PlacementSettings, SearchOutcome};

/// One identity to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterSubject {
    pub player: PlayerId,
    pub name: String,
    pub region: RegionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub player: PlayerId,
    pub region: RegionId,
    /// Feet position.
    pub at: BlockPos,
    pub fallback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScatterReport {
    pub placements: Vec<Placement>,
    pub fallbacks: usize,
    pub chunks_loaded: usize,
    pub chunks_failed: usize,
    /// Cancelled before relocation; placements may be partial.
    pub cancelled: bool,
}

/// Completion message sent back to the authority.
#[derive(Debug)]
pub struct ScatterOutcome {
    pub generation: u64,
    pub result: Result<ScatterReport, ScatterError>,
}

struct ActiveScatter {
    generation: u64,
    cancel: CancellationToken,
}

pub struct ScatterEngine {
    settings: Arc<PlacementSettings>,
    near_radius: i32,
    far_radius: i32,
    loader: Arc<ChunkLoader>,
    terrain: Arc<dyn Terrain>,
    progress: Arc<dyn ProgressSink>,
    done_tx: mpsc::UnboundedSender<ScatterOutcome>,
    seed: u64,
    generation: u64,
    active: Option<ActiveScatter>,
}

impl ScatterEngine {
    pub fn new(
        config: &GameConfig,
        terrain: Arc<dyn Terrain>,
        progress: Arc<dyn ProgressSink>,
        done_tx: mpsc::UnboundedSender<ScatterOutcome>,
        seed: u64,
    ) -> Self {
        let loader = Arc::new(ChunkLoader::new(
            Arc::clone(&terrain),
            config.max_parallel_chunk_loads,
        ));
        Self {
            settings: Arc::new(PlacementSettings::from(config)),
            near_radius: config.near_radius_cells,
            far_radius: config.far_radius_cells,
            loader,
            terrain,
            progress,
            done_tx,
            seed,
            generation: 0,
            active: None,
        }
    }

    /// Start scattering `subjects` in the background, cancelling any run
    /// still in flight. Returns the generation of the new run; its
    /// [`ScatterOutcome`] arrives on the completion channel.
    pub fn scatter(&mut self, subjects: Vec<ScatterSubject>) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.active = Some(ActiveScatter {
            generation,
            cancel: cancel.clone(),
        });

        tracing::info!(
            "Scatter #{} started for {} participant(s)",
            generation,
            subjects.len()
        );

        let job = ScatterJob {
            subjects,
            settings: Arc::clone(&self.settings),
            near_radius: self.near_radius,
            far_radius: self.far_radius,
            loader: Arc::clone(&self.loader),
            terrain: Arc::clone(&self.terrain),
            progress: Arc::clone(&self.progress),
            cancel,
            rng: ChaCha8Rng::seed_from_u64(self.seed ^ generation),
        };
        let progress = Arc::clone(&self.progress);
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let result = match tokio::spawn(job.run()).await {
                Ok(result) => result,
                Err(err) => {
                    progress.report(Progress::new(0, 1, ProgressLabel::Stopped));
                    Err(ScatterError::Crashed(err.to_string()))
                }
            };
            let _ = done_tx.send(ScatterOutcome { generation, result });
        });

        generation
    }

    /// Stop the running scatter, if any. Its completion still arrives but is
    /// stale.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!("Scatter #{} cancelled", active.generation);
            active.cancel.cancel();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Retire a finished run. Returns false for a stale generation.
    pub fn finish(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

struct ScatterJob {
    subjects: Vec<ScatterSubject>,
    settings: Arc<PlacementSettings>,
    near_radius: i32,
    far_radius: i32,
    loader: Arc<ChunkLoader>,
    terrain: Arc<dyn Terrain>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    rng: ChaCha8Rng,
}

impl ScatterJob {
    async fn run(mut self) -> Result<ScatterReport, ScatterError> {
        let mut report = ScatterReport::default();
        let outcome = self.place_all(&mut report).await;
        let outcome = match outcome {
            Ok(true) => self.warm_up(&mut report).await,
            other => other,
        };
        match outcome {
            Ok(true) => Ok(report),
            Ok(false) => {
                report.cancelled = true;
                self.progress
                    .report(Progress::new(0, 1, ProgressLabel::Stopped));
                Ok(report)
            }
            Err(err) => {
                tracing::error!("Scatter aborted: {}", err);
                self.progress
                    .report(Progress::new(0, 1, ProgressLabel::Stopped));
                Err(err)
            }
        }
    }

    /// Sequential placement with a growing claim set. Returns false if cancelled.
    async fn place_all(&mut self, report: &mut ScatterReport) -> Result<bool, ScatterError> {
        let total = self.subjects.len();
        let mut claims: Vec<Claim> = Vec::with_capacity(total);
        let search = PlacementSearch::new(
            &self.settings,
            &self.loader,
            self.terrain.as_ref(),
            &self.cancel,
        );

        for subject in &self.subjects {
            let done = report.placements.len();
            self.progress.report(Progress::new(
                done,
                total,
                ProgressLabel::Searching {
                    player: subject.player,
                    name: subject.name.clone(),
                },
            ));

            let progress = &self.progress;
            let player = subject.player;
            let outcome = search
                .find(subject.region, &claims, &mut self.rng, |attempt, rejection| {
                    progress.report(Progress::new(
                        done,
                        total,
                        ProgressLabel::Rejected {
                            player,
                            attempt,
                            rejection,
                        },
                    ));
                })
                .await?;

            let (at, fallback) = match outcome {
                SearchOutcome::Found(at) => (at, false),
                SearchOutcome::Fallback(at) => (at, true),
                SearchOutcome::Cancelled => return Ok(false),
            };
            if fallback {
                report.fallbacks += 1;
            }
            claims.push(Claim {
                region: subject.region,
                at,
            });
            report.placements.push(Placement {
                player: subject.player,
                region: subject.region,
                at,
                fallback,
            });
            tracing::info!("Placed {} ({}) at {}", subject.name, subject.player, at);
            self.progress.report(Progress::new(
                report.placements.len(),
                total,
                ProgressLabel::Placed {
                    player: subject.player,
                    location: at,
                    fallback,
                },
            ));
        }
        Ok(true)
    }

    /// Near wave to completion, then the far wave. Returns false if cancelled.
    async fn warm_up(&mut self, report: &mut ScatterReport) -> Result<bool, ScatterError> {
        let centers: Vec<ChunkKey> = report
            .placements
            .iter()
            .map(|placement| ChunkKey::containing(placement.region, placement.at))
            .collect();
        let (near, far) = partition_waves(&centers, self.near_radius, self.far_radius);
        let total = near.len() + far.len();
        tracing::info!(
            "Warming {} near and {} far cells",
            near.len(),
            far.len()
        );

        let mut done = 0;
        for (wave, keys) in [(Wave::Near, near), (Wave::Far, far)] {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            self.progress
                .report(Progress::new(done, total, ProgressLabel::LoadingChunks { wave }));

            let progress = &self.progress;
            let summary = self
                .loader
                .load_wave(keys, &self.cancel, |key, result| {
                    done += 1;
                    let label = match result {
                        Ok(()) => ProgressLabel::LoadingChunks { wave },
                        Err(err) => {
                            tracing::warn!(
                                "Skipping cell ({}, {}) in {:?} wave: {}",
                                key.cell_x,
                                key.cell_z,
                                wave,
                                err
                            );
                            ProgressLabel::ChunkFailed {
                                wave,
                                cell_x: key.cell_x,
                                cell_z: key.cell_z,
                            }
                        }
                    };
                    progress.report(Progress::new(done, total, label));
                })
                .await;

            report.chunks_loaded += summary.loaded;
            report.chunks_failed += summary.failures.len();
            if summary.cancelled {
                return Ok(false);
            }
        }

        self.progress
            .report(Progress::new(total, total, ProgressLabel::Complete));
        Ok(true)
    }
}

/// Move every placed participant who is still online: empty inventory,
/// teleport, pin the respawn point and grant invulnerability. Runs on the
/// authority. Returns the identities actually moved.
pub fn relocate(
    players: &mut impl PlayerHost,
    invulnerability: &mut Invulnerability,
    notifier: &dyn Notifier,
    report: &ScatterReport,
    invulnerability_ticks: u32,
) -> Vec<PlayerId> {
    let mut moved = Vec::with_capacity(report.placements.len());
    for placement in &report.placements {
        let id = placement.player;
        if !players.is_online(id) {
            tracing::debug!("{} left before relocation", id);
            continue;
        }
        let target = Location::new(placement.region, placement.at.standing_center());
        players.clear_inventory(id);
        players.teleport(id, target);
        players.set_respawn_point(id, Some(target));
        invulnerability.grant(players, id, invulnerability_ticks);
        notifier.notify(
            &Audience::Player(id),
            Notice::Teleported {
                location: placement.at,
            },
        );
        moved.push(id);
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::is_far_enough;
    use crate::sim::{ProceduralTerrain, RecordingProgress, RecordingNotifier, SimWorld};
    use std::time::Duration;

    fn small_config() -> GameConfig {
        GameConfig {
            search_margin_cells: 1,
            found_prewarm_cells: 1,
            near_radius_cells: 1,
            far_radius_cells: 2,
            ..GameConfig::default()
        }
    }

    fn subjects(n: u32) -> Vec<ScatterSubject> {
        (1..=n)
            .map(|i| ScatterSubject {
                player: PlayerId(i),
                name: format!("p{}", i),
                region: RegionId::OVERWORLD,
            })
            .collect()
    }

    fn engine(
        terrain: ProceduralTerrain,
    ) -> (
        ScatterEngine,
        Arc<RecordingProgress>,
        mpsc::UnboundedReceiver<ScatterOutcome>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = Arc::new(RecordingProgress::default());
        let engine = ScatterEngine::new(
            &small_config(),
            Arc::new(terrain),
            progress.clone(),
            tx,
            7,
        );
        (engine, progress, rx)
    }

    #[tokio::test]
    async fn placements_are_pairwise_far_apart_or_counted_fallbacks() {
        let (mut engine, progress, mut rx) = engine(ProceduralTerrain::new(11));
        let generation = engine.scatter(subjects(5));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.generation, generation);
        let report = outcome.result.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.placements.len(), 5);

        let claims: Vec<Claim> = report
            .placements
            .iter()
            .filter(|p| !p.fallback)
            .map(|p| Claim {
                region: p.region,
                at: p.at,
            })
            .collect();
        for (i, claim) in claims.iter().enumerate() {
            let others: Vec<Claim> = claims
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, c)| *c)
                .collect();
            assert!(is_far_enough(claim.region, claim.at.x, claim.at.z, &others, 10_000));
        }
        let fallbacks = report.placements.iter().filter(|p| p.fallback).count();
        assert_eq!(fallbacks, report.fallbacks);

        let last = progress.last().unwrap();
        assert_eq!(last.label, ProgressLabel::Complete);
        assert_eq!(last.ratio(), 1.0);
    }

    #[tokio::test]
    async fn second_scatter_cancels_first() {
        let terrain = ProceduralTerrain::new(3).with_latency(Duration::from_millis(20));
        let (mut engine, _progress, mut rx) = engine(terrain);

        let first = engine.scatter(subjects(3));
        let second = engine.scatter(subjects(2));
        assert!(!engine.is_current(first));
        assert!(engine.is_current(second));

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            outcomes.push(rx.recv().await.unwrap());
        }
        let stale = outcomes.iter().find(|o| o.generation == first).unwrap();
        assert!(stale.result.as_ref().unwrap().cancelled);
        assert!(!engine.finish(first));

        let fresh = outcomes.iter().find(|o| o.generation == second).unwrap();
        assert!(!fresh.result.as_ref().unwrap().cancelled);
        assert!(engine.finish(second));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn cancel_resolves_with_stopped_progress() {
        let terrain = ProceduralTerrain::new(5).with_latency(Duration::from_millis(50));
        let (mut engine, progress, mut rx) = engine(terrain);

        let generation = engine.scatter(subjects(4));
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("cancelled scatter must resolve")
            .unwrap();
        assert_eq!(outcome.generation, generation);
        assert!(outcome.result.unwrap().cancelled);
        assert_eq!(progress.last().unwrap().label, ProgressLabel::Stopped);
    }

    #[tokio::test]
    async fn empty_request_completes_immediately() {
        let (mut engine, progress, mut rx) = engine(ProceduralTerrain::new(1));
        engine.scatter(Vec::new());
        let report = rx.recv().await.unwrap().result.unwrap();
        assert!(report.placements.is_empty());
        assert_eq!(progress.last().unwrap().label, ProgressLabel::Complete);
    }

    #[tokio::test]
    async fn failed_cells_are_skipped_during_warm_up() {
        let terrain = ProceduralTerrain::new(9).with_failure_rate(0.2);
        let (mut engine, _progress, mut rx) = engine(terrain);
        engine.scatter(subjects(2));
        let report = rx.recv().await.unwrap().result.unwrap();
        assert_eq!(report.placements.len(), 2);
        assert!(!report.cancelled);
    }

    #[test]
    fn relocate_skips_players_who_left() {
        let mut world = SimWorld::new();
        let stays = world.join("stays");
        let leaves = world.join("leaves");
        world.leave(leaves);
        world.give(stays, "minecraft:dirt");

        let report = ScatterReport {
            placements: vec![
                Placement {
                    player: stays,
                    region: RegionId::OVERWORLD,
                    at: BlockPos::new(20_000, 70, -30_000),
                    fallback: false,
                },
                Placement {
                    player: leaves,
                    region: RegionId::OVERWORLD,
                    at: BlockPos::new(-40_000, 70, 40_000),
                    fallback: false,
                },
            ],
            ..Default::default()
        };
        let mut invuln = Invulnerability::new();
        let notifier = RecordingNotifier::default();

        let moved = relocate(&mut world, &mut invuln, &notifier, &report, 500);

        assert_eq!(moved, vec![stays]);
        let player = world.player(stays).unwrap();
        assert_eq!(player.location.block(), BlockPos::new(20_000, 70, -30_000));
        assert!(player.inventory.is_empty());
        assert!(player.respawn.is_some());
        assert_eq!(invuln.remaining(stays), Some(500));
        assert!(notifier
            .sent()
            .iter()
            .any(|(audience, notice)| *audience == Audience::Player(stays)
                && matches!(notice, Notice::Teleported { .. })));
    }
}
