//! Full rounds driven through the controller against the simulated host.
//!
//! Scatter runs for real on the tokio runtime; time for the countdown, the
//! possession scan and the swap schedule is passed in explicitly.

use lootrush_server::controller::{CommandSource, GameController};
use lootrush_server::error::{CommandError, ScatterError};
use lootrush_server::host::{Audience, Collaborators, PlayerHost};
use lootrush_server::items::ItemPool;
use lootrush_server::scatter::{ScatterOutcome, ScatterReport};
use lootrush_server::sim::{ProceduralTerrain, RecordingNotifier, RecordingProgress, SimWorld};
use lootrush_shared::config::GameConfig;
use lootrush_shared::geometry::Position;
use lootrush_shared::model::{ItemId, PlayerId, Role, RoundPhase};
use lootrush_shared::protocol::Notice;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const SECOND: Duration = Duration::from_secs(1);

fn diamond() -> ItemId {
    ItemId::new("minecraft:diamond")
}

fn quick_config() -> GameConfig {
    GameConfig {
        scatter_min_coord: 1_000,
        scatter_max_coord: 4_000,
        min_player_distance: 200,
        placement_attempts: 64,
        search_margin_cells: 0,
        found_prewarm_cells: 1,
        near_radius_cells: 1,
        far_radius_cells: 2,
        countdown_seconds: 3,
        ..GameConfig::default()
    }
}

struct Round {
    game: GameController<SimWorld>,
    notifier: RecordingNotifier,
    done_rx: mpsc::UnboundedReceiver<ScatterOutcome>,
    ids: Vec<PlayerId>,
}

impl Round {
    fn new(config: GameConfig, names: &[&str]) -> Self {
        let mut world = SimWorld::new();
        let ids = names.iter().map(|name| world.join(name)).collect();
        let notifier = RecordingNotifier::default();
        let (tx, done_rx) = mpsc::unbounded_channel();
        let collaborators = Collaborators {
            players: world,
            terrain: Arc::new(ProceduralTerrain::new(2024)),
            notifier: Box::new(notifier.clone()),
            progress: Arc::new(RecordingProgress::default()),
            items: Box::new(ItemPool::new(["minecraft:diamond"], &[], 1)),
        };
        Self {
            game: GameController::new(config, collaborators, tx, 5),
            notifier,
            done_rx,
            ids,
        }
    }

    async fn next_outcome(&mut self) -> ScatterOutcome {
        tokio::time::timeout(Duration::from_secs(30), self.done_rx.recv())
            .await
            .expect("scatter did not finish in time")
            .expect("scatter channel closed")
    }

    /// Start, wait for the scatter and hand the result to the controller.
    async fn start_and_scatter(&mut self, now: Instant) {
        self.game.start(CommandSource::console()).unwrap();
        let outcome = self.next_outcome().await;
        self.game.on_scatter_finished(outcome, now);
    }

    /// Walk the countdown to Active, one step per second.
    async fn run_to_active(&mut self, base: Instant) -> Instant {
        self.start_and_scatter(base).await;
        let mut now = base;
        for _ in 0..self.game.config().countdown_seconds {
            now += SECOND;
            self.game.tick(now);
        }
        assert_eq!(self.game.phase(), RoundPhase::Active);
        now
    }

    fn notices(&self) -> Vec<Notice> {
        self.notifier.notices()
    }

    fn won_by(&self) -> Option<PlayerId> {
        self.notices().into_iter().find_map(|notice| match notice {
            Notice::PlayerWon { player, .. } => Some(player),
            _ => None,
        })
    }
}

#[tokio::test]
async fn pickup_of_target_wins_and_resets_everyone() {
    let mut round = Round::new(quick_config(), &["alice", "bob", "carol"]);
    round.run_to_active(Instant::now()).await;
    let (alice, bob) = (round.ids[0], round.ids[1]);

    round.game.players_mut().give(bob, "minecraft:stick");
    round.game.players_mut().give(alice, "minecraft:diamond");
    round.game.on_pickup(alice, &diamond());

    assert_eq!(round.game.phase(), RoundPhase::Idle);
    assert_eq!(round.won_by(), Some(alice));
    assert!(!round.game.is_swap_running());
    assert!(!round.game.has_lives_entries());
    assert!(round.game.invulnerability().is_empty());

    let spawn = round.game.players().world_spawn();
    for id in &round.ids {
        let player = round.game.players().player(*id).unwrap();
        assert_eq!(player.location, spawn);
        assert!(player.inventory.is_empty());
        assert_eq!(player.respawn, None);
        assert!(!player.invulnerable);
    }
}

#[tokio::test]
async fn possession_scan_catches_silent_pickups() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    let active_at = round.run_to_active(Instant::now()).await;
    let bob = round.ids[1];

    round.game.players_mut().give(bob, "minecraft:diamond");
    // scans are throttled to once per second
    round.game.tick(active_at + Duration::from_millis(200));
    assert_eq!(round.game.phase(), RoundPhase::Active);
    round.game.tick(active_at + SECOND);
    assert_eq!(round.game.phase(), RoundPhase::Idle);
    assert_eq!(round.won_by(), Some(bob));
}

#[tokio::test]
async fn scatter_places_everyone_apart_and_protects_them() {
    let mut round = Round::new(quick_config(), &["alice", "bob", "carol"]);
    round.start_and_scatter(Instant::now()).await;
    assert_eq!(round.game.phase(), RoundPhase::Countdown);
    assert_eq!(round.game.countdown_remaining(), Some(3));

    let blocks: Vec<_> = round
        .ids
        .iter()
        .map(|id| round.game.players().location(*id).unwrap().block())
        .collect();
    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            assert!(a.horizontal_distance_sq(*b) >= 200 * 200);
        }
    }
    for id in &round.ids {
        let player = round.game.players().player(*id).unwrap();
        assert!(player.invulnerable);
        assert_eq!(player.respawn, Some(player.location));
    }
    assert!(round
        .notices()
        .contains(&Notice::PlayersTeleported { countdown: 3 }));
}

#[tokio::test]
async fn start_while_active_is_rejected() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    round.run_to_active(Instant::now()).await;
    assert_eq!(
        round.game.start(CommandSource::console()),
        Err(CommandError::AlreadyRunning)
    );
    assert_eq!(round.game.cancel(), Err(CommandError::NoCountdown));
    assert_eq!(round.game.phase(), RoundPhase::Active);
}

#[tokio::test]
async fn cancel_during_scatter_discards_late_completion() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    round.game.start(CommandSource::console()).unwrap();
    round.game.cancel().unwrap();
    assert_eq!(round.game.phase(), RoundPhase::Idle);

    let outcome = round.next_outcome().await;
    round.game.on_scatter_finished(outcome, Instant::now());

    let spawn = round.game.players().world_spawn();
    assert_eq!(round.game.phase(), RoundPhase::Idle);
    for id in &round.ids {
        assert_eq!(round.game.players().location(*id), Some(spawn));
        assert!(round.game.invulnerability().is_empty());
    }
    assert!(!round
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::PlayersTeleported { .. } | Notice::Teleported { .. })));
}

#[tokio::test]
async fn completion_from_previous_round_is_stale() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    round.game.start(CommandSource::console()).unwrap();
    round.game.stop().unwrap();
    round.game.start(CommandSource::console()).unwrap();

    // first run's outcome, then the second's; only the second may apply
    let mut outcomes = vec![round.next_outcome().await, round.next_outcome().await];
    outcomes.sort_by_key(|o| o.generation);
    let current = outcomes.pop().unwrap();
    let stale = outcomes.pop().unwrap();

    round.game.on_scatter_finished(stale, Instant::now());
    assert_eq!(round.game.countdown_remaining(), None);
    round.game.on_scatter_finished(current, Instant::now());
    assert_eq!(round.game.countdown_remaining(), Some(3));
}

#[tokio::test]
async fn countdown_steps_once_per_second_and_never_skips() {
    let mut round = Round::new(quick_config(), &["alice"]);
    let base = Instant::now();
    round.start_and_scatter(base).await;

    round.game.tick(base + Duration::from_millis(500));
    assert_eq!(round.game.countdown_remaining(), Some(3));
    // a long stall still only advances one step
    round.game.tick(base + Duration::from_secs(10));
    assert_eq!(round.game.countdown_remaining(), Some(2));
    round.game.tick(base + Duration::from_secs(11));
    assert_eq!(round.game.countdown_remaining(), Some(1));
    assert_eq!(round.game.phase(), RoundPhase::Countdown);
    round.game.tick(base + Duration::from_secs(12));
    assert_eq!(round.game.phase(), RoundPhase::Active);

    let steps: Vec<Notice> = round
        .notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::StartingIn { .. } | Notice::RoundStarted { .. }))
        .collect();
    assert_eq!(
        steps,
        vec![
            Notice::StartingIn { seconds: 2 },
            Notice::StartingIn { seconds: 1 },
            Notice::RoundStarted { target: diamond() },
        ]
    );
}

#[tokio::test]
async fn zero_countdown_activates_immediately() {
    let config = GameConfig {
        countdown_seconds: 0,
        ..quick_config()
    };
    let mut round = Round::new(config, &["alice"]);
    round.start_and_scatter(Instant::now()).await;
    assert_eq!(round.game.phase(), RoundPhase::Active);
}

#[tokio::test]
async fn players_are_frozen_during_countdown() {
    let mut round = Round::new(quick_config(), &["alice"]);
    let base = Instant::now();
    round.start_and_scatter(base).await;
    let alice = round.ids[0];
    let placed = round.game.players().location(alice).unwrap();

    round.game.players_mut().nudge(alice, 3.0, 0.0);
    round.game.tick(base + Duration::from_millis(50));
    assert_eq!(round.game.players().location(alice), Some(placed));

    // moving inside the same block is fine
    let mut inside = placed;
    inside.pos = Position::new(placed.pos.x + 0.3, placed.pos.y, placed.pos.z);
    round.game.players_mut().set_location(alice, inside);
    round.game.tick(base + Duration::from_millis(100));
    assert_eq!(round.game.players().location(alice), Some(inside));
}

#[tokio::test]
async fn last_player_standing_wins() {
    let config = GameConfig {
        max_lives: 2,
        ..quick_config()
    };
    let mut round = Round::new(config, &["alice", "bob"]);
    let now = round.run_to_active(Instant::now()).await;
    let (alice, bob) = (round.ids[0], round.ids[1]);

    round.game.on_death(alice);
    assert_eq!(round.game.lives(alice), 1);
    round.game.tick(now + Duration::from_millis(50));
    assert_eq!(round.game.phase(), RoundPhase::Active);

    round.game.on_death(alice);
    assert_eq!(round.game.role(alice), Role::Spectator);
    round.game.tick(now + Duration::from_millis(100));

    assert_eq!(round.game.phase(), RoundPhase::Idle);
    assert_eq!(round.won_by(), Some(bob));
    let notices = round.notices();
    assert!(notices.contains(&Notice::LivesRemaining { lives: 1, max: 2 }));
    assert!(notices.contains(&Notice::OutOfLives));
    assert!(notices.iter().any(|n| matches!(
        n,
        Notice::LastPlayerStanding { player, .. } if *player == bob
    )));
    // the eliminated spectator is a Player again for the next round
    assert_eq!(round.game.role(alice), Role::Player);
}

#[tokio::test]
async fn holding_target_beats_last_standing() {
    let config = GameConfig {
        max_lives: 1,
        ..quick_config()
    };
    let mut round = Round::new(config, &["alice", "bob", "carol"]);
    let now = round.run_to_active(Instant::now()).await;
    let (alice, bob, carol) = (round.ids[0], round.ids[1], round.ids[2]);

    round.game.players_mut().give(carol, "minecraft:diamond");
    round.game.on_death(alice);
    round.game.on_death(bob);
    round.game.tick(now + Duration::from_millis(50));

    assert_eq!(round.won_by(), Some(carol));
    assert!(!round
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::LastPlayerStanding { .. })));
}

#[tokio::test]
async fn leaving_participant_can_end_the_round() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    let now = round.run_to_active(Instant::now()).await;
    let (alice, bob) = (round.ids[0], round.ids[1]);

    round.game.players_mut().leave(alice);
    round.game.on_disconnect(alice);
    round.game.tick(now + Duration::from_millis(50));
    assert_eq!(round.won_by(), Some(bob));
}

#[tokio::test]
async fn leaving_during_countdown_ends_round_once_active() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    let base = Instant::now();
    round.start_and_scatter(base).await;
    let (alice, bob) = (round.ids[0], round.ids[1]);

    round.game.players_mut().leave(bob);
    round.game.on_disconnect(bob);
    assert_eq!(round.game.phase(), RoundPhase::Countdown);

    let mut now = base;
    for _ in 0..round.game.config().countdown_seconds {
        now += SECOND;
        round.game.tick(now);
    }
    assert_eq!(round.game.phase(), RoundPhase::Active);

    round.game.tick(now + Duration::from_millis(50));
    assert_eq!(round.game.phase(), RoundPhase::Idle);
    assert_eq!(round.won_by(), Some(alice));
}

#[tokio::test]
async fn solo_round_survives_its_player_reconnecting() {
    let mut round = Round::new(quick_config(), &["alice"]);
    let base = Instant::now();
    round.start_and_scatter(base).await;
    let alice = round.ids[0];

    round.game.players_mut().leave(alice);
    round.game.on_disconnect(alice);
    round.game.players_mut().rejoin(alice);
    round.game.on_join(alice);

    let mut now = base;
    for _ in 0..round.game.config().countdown_seconds {
        now += SECOND;
        round.game.tick(now);
    }
    for i in 1..=3 {
        round.game.tick(now + SECOND * i);
    }
    assert_eq!(round.game.phase(), RoundPhase::Active);
}

#[tokio::test]
async fn solo_round_does_not_end_by_itself() {
    let mut round = Round::new(quick_config(), &["alice"]);
    let now = round.run_to_active(Instant::now()).await;
    for i in 1..=5 {
        round.game.tick(now + SECOND * i);
    }
    assert_eq!(round.game.phase(), RoundPhase::Active);
}

#[tokio::test]
async fn scatter_failure_aborts_and_tells_the_starter() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    let alice = round.ids[0];
    round.game.start(CommandSource::player(alice, true)).unwrap();

    round.game.on_scatter_finished(
        ScatterOutcome {
            generation: 1,
            result: Err(ScatterError::Crashed("boom".to_string())),
        },
        Instant::now(),
    );
    assert_eq!(round.game.phase(), RoundPhase::Idle);
    let sent = round.notifier.sent();
    assert!(matches!(
        sent.last(),
        Some((Audience::Player(to), Notice::ScatterFailed { reason }))
            if *to == alice && reason.contains("boom")
    ));
}

#[tokio::test]
async fn cancelled_report_does_not_relocate() {
    let mut round = Round::new(quick_config(), &["alice"]);
    round.game.start(CommandSource::console()).unwrap();
    round.game.on_scatter_finished(
        ScatterOutcome {
            generation: 1,
            result: Ok(ScatterReport {
                cancelled: true,
                ..ScatterReport::default()
            }),
        },
        Instant::now(),
    );
    assert_eq!(round.game.countdown_remaining(), None);
    assert!(round.game.invulnerability().is_empty());
}

#[tokio::test]
async fn skip_strips_previous_target_from_everyone() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    round.run_to_active(Instant::now()).await;
    let bob = round.ids[1];
    round.game.set_role(CommandSource::console(), "spectator", &[bob]).unwrap();
    round.game.players_mut().give(bob, "minecraft:diamond");

    round.game.skip().unwrap();
    assert!(!round.game.players().has_item(bob, &diamond()));
    assert!(round
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::TargetSkipped { .. })));
}

#[tokio::test]
async fn stop_clears_inventories_and_respawn_overrides() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    round.run_to_active(Instant::now()).await;
    let alice = round.ids[0];
    round.game.players_mut().give(alice, "minecraft:stick");

    round.game.stop().unwrap();
    assert_eq!(round.game.phase(), RoundPhase::Idle);
    for id in &round.ids {
        let player = round.game.players().player(*id).unwrap();
        assert!(player.inventory.is_empty());
        assert_eq!(player.respawn, None);
    }
    assert_eq!(round.notices().last(), Some(&Notice::GameStopped));
}

#[tokio::test]
async fn player_role_mid_round_grants_full_lives() {
    let config = GameConfig {
        max_lives: 3,
        ..quick_config()
    };
    let mut round = Round::new(config, &["alice", "bob"]);
    round.run_to_active(Instant::now()).await;
    let late = round.game.players_mut().join("late");
    round.game.on_join(late);
    assert_eq!(round.game.role(late), Role::Spectator);

    round.game.set_role(CommandSource::console(), "player", &[late]).unwrap();
    assert_eq!(round.game.role(late), Role::Player);
    assert_eq!(round.game.lives(late), 3);
}

#[tokio::test]
async fn swap_warning_reaches_participants() {
    let mut round = Round::new(quick_config(), &["alice", "bob"]);
    let active_at = round.run_to_active(Instant::now()).await;
    let interval = round.game.config().swap_interval();

    round.game.tick(active_at + interval - Duration::from_secs(60));
    let sent = round.notifier.sent();
    assert!(sent.iter().any(|(audience, notice)| {
        *notice == Notice::SwapWarning { seconds: 60 }
            && matches!(audience, Audience::Participants(ids) if ids.len() == 2)
    }));

    round.game.tick(active_at + interval);
    assert!(round.notices().contains(&Notice::Swapping));
}
