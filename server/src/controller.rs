//! Round phase machine.
//!
//! `GameController` owns every piece of mutable round state and is driven by
//! one authority task: admin commands, player events, scatter completions
//! and periodic ticks all arrive as plain method calls. Nothing here blocks;
//! the only background work is the scatter, whose result comes back through
//! [`GameController::on_scatter_finished`].

use lootrush_shared::config::GameConfig;
use lootrush_shared::geometry::Location;
use lootrush_shared::model::{ItemId, PlayerId, Role, RoundPhase};
use lootrush_shared::protocol::{Notice, StatusMsg};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::CommandError;
use crate::host::{Audience, Collaborators, GameMode, ItemSelector, Notifier, PlayerHost};
use crate::invulnerability::Invulnerability;
use crate::lives::{LifeLoss, LivesLedger};
use crate::roles::RoleBook;
use crate::scatter::{relocate, ScatterEngine, ScatterOutcome, ScatterSubject};
use crate::swap::{SwapScheduler, SwapTick};

const ONE_SECOND: Duration = Duration::from_secs(1);

/// Who issued an admin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSource {
    pub player: Option<PlayerId>,
    pub operator: bool,
}

impl CommandSource {
    pub fn console() -> Self {
        Self {
            player: None,
            operator: true,
        }
    }

    pub fn player(id: PlayerId, operator: bool) -> Self {
        Self {
            player: Some(id),
            operator,
        }
    }

    fn audience(&self) -> Audience {
        match self.player {
            Some(id) => Audience::Player(id),
            None => Audience::Console,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Cancel,
}

#[derive(Debug)]
struct Countdown {
    remaining: u32,
    last_step: Instant,
    /// Where each Player was standing when the countdown began.
    frozen: HashMap<PlayerId, Location>,
}

/// Everything that exists only while a round runs.
#[derive(Debug, Default)]
struct RoundState {
    phase: RoundPhase,
    target: Option<ItemId>,
    starter: Option<CommandSource>,
    scatter_generation: Option<u64>,
    countdown: Option<Countdown>,
    active_since: Option<Instant>,
    last_possession_scan: Option<Instant>,
    /// Participants when the round was started.
    starting_players: usize,
    /// A life was lost or a Player left since the last tick. Set during
    /// Countdown too, in which case it carries over into Active.
    survivor_check_pending: bool,
}

pub struct GameController<P: PlayerHost> {
    config: GameConfig,
    players: P,
    notifier: Box<dyn Notifier>,
    items: Box<dyn ItemSelector>,
    scatter: ScatterEngine,
    swap: SwapScheduler,
    invulnerability: Invulnerability,
    roles: RoleBook,
    lives: LivesLedger,
    round: RoundState,
}

impl<P: PlayerHost> GameController<P> {
    pub fn new(
        config: GameConfig,
        collaborators: Collaborators<P>,
        scatter_done: mpsc::UnboundedSender<ScatterOutcome>,
        seed: u64,
    ) -> Self {
        let Collaborators {
            players,
            terrain,
            notifier,
            progress,
            items,
        } = collaborators;
        let scatter = ScatterEngine::new(&config, terrain, progress, scatter_done, seed);
        let swap = SwapScheduler::new(config.swap_interval(), seed.rotate_left(17));
        let lives = LivesLedger::new(config.max_lives);
        Self {
            config,
            players,
            notifier,
            items,
            scatter,
            swap,
            invulnerability: Invulnerability::new(),
            roles: RoleBook::new(),
            lives,
            round: RoundState::default(),
        }
    }

    // === Queries ===

    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    pub fn target(&self) -> Option<&ItemId> {
        self.round.target.as_ref()
    }

    pub fn role(&self, id: PlayerId) -> Role {
        self.roles.role(id)
    }

    pub fn lives(&self, id: PlayerId) -> u32 {
        self.lives.lives(id)
    }

    pub fn has_lives_entries(&self) -> bool {
        !self.lives.is_empty()
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.round.countdown.as_ref().map(|c| c.remaining)
    }

    pub fn is_scatter_running(&self) -> bool {
        self.scatter.is_running()
    }

    pub fn is_swap_running(&self) -> bool {
        self.swap.is_running()
    }

    pub fn invulnerability(&self) -> &Invulnerability {
        &self.invulnerability
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn players(&self) -> &P {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut P {
        &mut self.players
    }

    /// Online identities holding the Player role.
    pub fn participants(&self) -> Vec<PlayerId> {
        self.players
            .online_players()
            .into_iter()
            .filter(|id| self.roles.is_player(*id))
            .collect()
    }

    /// Participants that still have lives left.
    fn survivors(&self) -> Vec<PlayerId> {
        self.participants()
            .into_iter()
            .filter(|id| self.lives.has_lives(*id))
            .collect()
    }

    pub fn status(&self, now: Instant) -> StatusMsg {
        let elapsed = self.round.active_since.map(|since| {
            let secs = now.saturating_duration_since(since).as_secs();
            format!("{:02}:{:02}", secs / 60, secs % 60)
        });
        StatusMsg {
            phase: self.round.phase,
            target: self.round.target.clone(),
            elapsed,
            countdown_remaining: self.countdown_remaining(),
            players_alive: match self.round.phase {
                RoundPhase::Idle => 0,
                _ => self.survivors().len(),
            },
        }
    }

    // === Admin commands ===

    pub fn start(&mut self, source: CommandSource) -> Result<(), CommandError> {
        if self.round.phase != RoundPhase::Idle {
            return Err(CommandError::AlreadyRunning);
        }
        let online = self.players.online_players();
        let (participants, spectators) = self.roles.partition(&online);
        if participants.is_empty() {
            return Err(CommandError::NoParticipants);
        }

        let target = self.items.pick();
        self.round = RoundState {
            phase: RoundPhase::Countdown,
            target: Some(target.clone()),
            starter: Some(source),
            starting_players: participants.len(),
            ..RoundState::default()
        };
        tracing::info!(
            "Round starting: {} participant(s), {} spectator(s), target {}",
            participants.len(),
            spectators.len(),
            target
        );

        for id in &spectators {
            self.players.set_game_mode(*id, GameMode::Spectator);
            self.notify(Audience::Player(*id), Notice::SpectatingRound);
        }

        let holding = self.players.world_spawn();
        for id in &online {
            self.players.teleport(*id, holding);
            self.players.clear_inventory(*id);
        }

        self.notify(Audience::All, Notice::RoundStarting { target });
        self.lives.reset(&participants);

        let subjects: Vec<ScatterSubject> = participants
            .iter()
            .map(|id| ScatterSubject {
                player: *id,
                name: self.display_name(*id),
                region: holding.region,
            })
            .collect();
        self.notify(
            Audience::Participants(participants.clone()),
            Notice::LoadingChunks,
        );
        self.round.scatter_generation = Some(self.scatter.scatter(subjects));
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CommandError> {
        if self.round.phase == RoundPhase::Idle {
            return Err(CommandError::AlreadyStopped);
        }
        tracing::info!("Round stopped by admin");
        self.end_round(true);
        self.notify(Audience::All, Notice::GameStopped);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), CommandError> {
        if self.round.phase != RoundPhase::Countdown {
            return Err(CommandError::NoCountdown);
        }
        tracing::info!("Round cancelled during countdown");
        self.end_round(false);
        self.notify(Audience::All, Notice::GameCancelled);
        Ok(())
    }

    /// Draw a new target and take the previous one away from everybody.
    pub fn skip(&mut self) -> Result<(), CommandError> {
        if self.round.phase != RoundPhase::Active {
            return Err(CommandError::NotActive);
        }
        let Some(previous) = self.round.target.take() else {
            return Err(CommandError::NoCurrentTarget);
        };
        let next = self.items.pick();
        for id in self.players.online_players() {
            self.players.remove_item(id, &previous);
        }
        tracing::info!("Target skipped: {} -> {}", previous, next);
        self.round.target = Some(next.clone());
        self.notify(Audience::All, Notice::TargetSkipped { target: next });
        Ok(())
    }

    /// Assign `role` to `targets`, or to the issuer when `targets` is empty.
    /// Offline targets are ignored. Returns how many identities changed.
    pub fn set_role(
        &mut self,
        source: CommandSource,
        role: &str,
        targets: &[PlayerId],
    ) -> Result<usize, CommandError> {
        if !source.operator {
            return Err(CommandError::Unauthorized);
        }
        let role: Role = role.parse().map_err(CommandError::UnknownRole)?;

        let requested: Vec<PlayerId> = if targets.is_empty() {
            source.player.into_iter().collect()
        } else {
            targets.to_vec()
        };
        let resolved: Vec<PlayerId> = requested
            .into_iter()
            .filter(|id| self.players.is_online(*id))
            .collect();
        if resolved.is_empty() {
            return Err(CommandError::NoTargets);
        }

        let running = self.round.phase != RoundPhase::Idle;
        for id in &resolved {
            self.roles.set(*id, role);
            match role {
                Role::Player => {
                    self.players.set_game_mode(*id, GameMode::Survival);
                    if running {
                        self.lives.grant_full(*id);
                    }
                }
                Role::Spectator => {
                    self.players.set_game_mode(*id, GameMode::Spectator);
                    if let Some(countdown) = self.round.countdown.as_mut() {
                        countdown.frozen.remove(id);
                    }
                }
            }
            self.notify(
                Audience::Player(*id),
                Notice::RoleChanged {
                    role,
                    by_admin: source.player != Some(*id),
                },
            );
        }
        if role == Role::Spectator && self.round.phase == RoundPhase::Active {
            self.round.survivor_check_pending = true;
        }
        tracing::info!("Role {} assigned to {} identities", role, resolved.len());
        Ok(resolved.len())
    }

    // === Player events ===

    pub fn on_pickup(&mut self, id: PlayerId, item: &ItemId) {
        if self.round.phase != RoundPhase::Active || !self.roles.is_player(id) {
            return;
        }
        if self.round.target.as_ref() == Some(item) {
            self.finish_with_winner(id);
        }
    }

    pub fn on_death(&mut self, id: PlayerId) {
        if self.round.phase != RoundPhase::Active || !self.roles.is_player(id) {
            return;
        }
        match self.lives.lose_one(id) {
            LifeLoss::Remaining(left) => {
                self.notify(
                    Audience::Player(id),
                    Notice::LivesRemaining {
                        lives: left,
                        max: self.lives.max(),
                    },
                );
            }
            LifeLoss::Eliminated => {
                let name = self.display_name(id);
                tracing::info!("{} ({}) is out of lives", name, id);
                self.roles.set(id, Role::Spectator);
                self.players.set_game_mode(id, GameMode::Spectator);
                self.notify(Audience::Player(id), Notice::OutOfLives);
                let audience = Audience::Participants(self.participants());
                self.notify(audience, Notice::PlayerEliminated { player: id, name });
            }
            LifeLoss::AlreadyOut => return,
        }
        self.round.survivor_check_pending = true;
    }

    /// A player connected. Joining a running round without a lives entry
    /// makes them a spectator for the rest of it.
    pub fn on_join(&mut self, id: PlayerId) {
        if self.round.phase == RoundPhase::Idle {
            return;
        }
        if self.roles.is_player(id) && !self.lives.contains(id) {
            self.roles.set(id, Role::Spectator);
            self.players.set_game_mode(id, GameMode::Spectator);
            self.notify(Audience::Player(id), Notice::SpectatingRound);
        }
    }

    pub fn on_disconnect(&mut self, id: PlayerId) {
        self.invulnerability.remove(id);
        if let Some(countdown) = self.round.countdown.as_mut() {
            countdown.frozen.remove(&id);
        }
        if !self.roles.is_player(id) {
            return;
        }
        let contested = match self.round.phase {
            RoundPhase::Idle => false,
            RoundPhase::Countdown => self.round.starting_players >= 2,
            RoundPhase::Active => true,
        };
        if contested {
            self.round.survivor_check_pending = true;
        }
    }

    pub fn on_damage(&self, id: PlayerId) -> Verdict {
        let countdown_player =
            self.round.phase == RoundPhase::Countdown && self.roles.is_player(id);
        if self.invulnerability.contains(id) || countdown_player {
            Verdict::Cancel
        } else {
            Verdict::Allow
        }
    }

    pub fn on_block_break(&self, id: PlayerId) -> Verdict {
        if self.round.phase == RoundPhase::Countdown && self.roles.is_player(id) {
            Verdict::Cancel
        } else {
            Verdict::Allow
        }
    }

    // === Scatter completion ===

    pub fn on_scatter_finished(&mut self, outcome: ScatterOutcome, now: Instant) {
        let fresh = self.scatter.finish(outcome.generation);
        if !fresh
            || self.round.phase != RoundPhase::Countdown
            || self.round.scatter_generation != Some(outcome.generation)
        {
            tracing::debug!("Discarding stale scatter #{}", outcome.generation);
            return;
        }
        self.round.scatter_generation = None;

        let report = match outcome.result {
            Ok(report) if report.cancelled => return,
            Ok(report) => report,
            Err(err) => {
                tracing::error!("Round aborted, scatter failed: {}", err);
                let starter = self.round.starter.unwrap_or_else(CommandSource::console);
                self.end_round(false);
                self.notify(
                    starter.audience(),
                    Notice::ScatterFailed {
                        reason: err.to_string(),
                    },
                );
                return;
            }
        };

        if report.fallbacks > 0 {
            tracing::warn!("{} participant(s) placed at fallback spots", report.fallbacks);
        }
        relocate(
            &mut self.players,
            &mut self.invulnerability,
            self.notifier.as_ref(),
            &report,
            self.config.invulnerability_ticks,
        );

        let seconds = self.config.countdown_seconds;
        self.notify(Audience::All, Notice::PlayersTeleported { countdown: seconds });
        if seconds == 0 {
            self.activate(now);
            return;
        }
        let frozen: HashMap<PlayerId, Location> = self
            .participants()
            .into_iter()
            .filter_map(|id| Some((id, self.players.location(id)?)))
            .collect();
        self.round.countdown = Some(Countdown {
            remaining: seconds,
            last_step: now,
            frozen,
        });
    }

    // === Tick ===

    pub fn tick(&mut self, now: Instant) {
        self.invulnerability.tick(&mut self.players);
        match self.round.phase {
            RoundPhase::Idle => {}
            RoundPhase::Countdown => self.tick_countdown(now),
            RoundPhase::Active => self.tick_active(now),
        }
    }

    fn tick_countdown(&mut self, now: Instant) {
        let Some(countdown) = self.round.countdown.as_mut() else {
            // scatter still running
            return;
        };

        for (id, frozen) in &countdown.frozen {
            let Some(current) = self.players.location(*id) else {
                continue;
            };
            if current.region != frozen.region || current.block() != frozen.block() {
                self.players.teleport(*id, *frozen);
            }
        }

        if now.saturating_duration_since(countdown.last_step) < ONE_SECOND {
            return;
        }
        countdown.last_step = now;
        countdown.remaining = countdown.remaining.saturating_sub(1);
        let remaining = countdown.remaining;
        if remaining == 0 {
            self.activate(now);
        } else {
            self.notify(Audience::All, Notice::StartingIn { seconds: remaining });
        }
    }

    fn activate(&mut self, now: Instant) {
        self.round.countdown = None;
        self.round.phase = RoundPhase::Active;
        self.round.active_since = Some(now);
        self.round.last_possession_scan = Some(now);
        self.swap.start(now);
        if let Some(target) = self.round.target.clone() {
            tracing::info!("Round active, target {}", target);
            self.notify(Audience::All, Notice::RoundStarted { target });
        }
    }

    fn tick_active(&mut self, now: Instant) {
        let eligible: Vec<PlayerId> = self
            .survivors()
            .into_iter()
            .filter(|id| self.players.is_alive(*id))
            .collect();
        match self.swap.tick(
            now,
            &eligible,
            &mut self.players,
            &mut self.invulnerability,
            self.config.invulnerability_ticks,
        ) {
            SwapTick::Idle => {}
            SwapTick::Warning(seconds) => {
                self.notify(
                    Audience::Participants(self.participants()),
                    Notice::SwapWarning { seconds },
                );
            }
            SwapTick::Swapped(moved) => {
                self.notify(Audience::Participants(moved), Notice::Swapping);
            }
        }

        // Possession is checked before the last-standing rule so that holding
        // the target wins over outliving everyone in the same tick.
        let scan_due = self
            .round
            .last_possession_scan
            .map_or(true, |last| now.saturating_duration_since(last) >= ONE_SECOND);
        if self.round.survivor_check_pending || scan_due {
            self.round.last_possession_scan = Some(now);
            if let Some(winner) = self.find_holder() {
                self.finish_with_winner(winner);
                return;
            }
        }

        if std::mem::take(&mut self.round.survivor_check_pending) {
            if let [last] = self.survivors().as_slice() {
                let last = *last;
                let name = self.display_name(last);
                tracing::info!("{} ({}) is the last player standing", name, last);
                self.notify(
                    Audience::All,
                    Notice::LastPlayerStanding { player: last, name },
                );
                self.finish_with_winner(last);
            }
        }
    }

    fn find_holder(&self) -> Option<PlayerId> {
        let target = self.round.target.as_ref()?;
        self.participants()
            .into_iter()
            .find(|id| self.players.has_item(*id, target))
    }

    // === Round teardown ===

    fn finish_with_winner(&mut self, winner: PlayerId) {
        let Some(target) = self.round.target.clone() else {
            return;
        };
        let name = self.display_name(winner);
        tracing::info!("{} ({}) won with {}", name, winner, target);
        self.notify(
            Audience::All,
            Notice::PlayerWon {
                player: winner,
                name,
                target,
            },
        );

        let spawn = self.players.world_spawn();
        for id in self.players.online_players() {
            if !self.roles.is_player(id) {
                self.roles.set(id, Role::Player);
                self.players.set_game_mode(id, GameMode::Survival);
            }
            self.players.clear_inventory(id);
            self.players.set_respawn_point(id, None);
            self.players.teleport(id, spawn);
            self.notify(Audience::Player(id), Notice::ReturningToSpawn);
        }
        self.end_round(false);
    }

    /// Back to Idle: stop background work, drop round bookkeeping and the
    /// respawn overrides. Spectators return to survival mode.
    fn end_round(&mut self, clear_inventories: bool) {
        self.scatter.cancel();
        self.swap.stop();
        self.invulnerability.revoke_all(&mut self.players);
        self.lives.clear();
        for id in self.players.online_players() {
            if clear_inventories {
                self.players.clear_inventory(id);
            }
            self.players.set_respawn_point(id, None);
            if !self.roles.is_player(id) {
                self.players.set_game_mode(id, GameMode::Survival);
            }
        }
        self.roles.clear();
        self.round = RoundState::default();
    }

    fn display_name(&self, id: PlayerId) -> String {
        self.players.name(id).unwrap_or_else(|| id.to_string())
    }

    fn notify(&self, audience: Audience, notice: Notice) {
        self.notifier.notify(&audience, notice);
    }
}
