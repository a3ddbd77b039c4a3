//! Periodic position swap among surviving participants.
//!
//! Every interval the eligible participants are shuffled and each one takes
//! the position (and respawn point) the next one in the shuffled order had, so
//! the movement forms a single cycle and nobody stays in place.

use lootrush_shared::geometry::Location;
use lootrush_shared::model::PlayerId;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};

use crate::host::PlayerHost;
use crate::invulnerability::Invulnerability;

/// Seconds-before-swap at which a warning goes out (besides 10..=1).
const LONG_WARNINGS: [u32; 2] = [60, 30];
const COUNTDOWN_FROM: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapTick {
    Idle,
    Warning(u32),
    /// Identities that were moved, in shuffled order.
    Swapped(Vec<PlayerId>),
}

/// Pair every entry with the one after it, wrapping around.
/// `(mover, source)` means `mover` takes the spot `source` had.
pub fn cycle_assignment(order: &[PlayerId]) -> Vec<(PlayerId, PlayerId)> {
    let n = order.len();
    (0..n).map(|i| (order[i], order[(i + 1) % n])).collect()
}

fn ceil_seconds(d: Duration) -> u32 {
    let whole = d.as_secs();
    let rounded = if d.subsec_nanos() > 0 { whole + 1 } else { whole };
    rounded.min(u32::MAX as u64) as u32
}

fn should_warn(seconds: u32) -> bool {
    LONG_WARNINGS.contains(&seconds) || (1..=COUNTDOWN_FROM).contains(&seconds)
}

pub struct SwapScheduler {
    interval: Duration,
    round_start: Option<Instant>,
    next_swap: Option<Instant>,
    last_warning: Option<u32>,
    rng: ChaCha8Rng,
}

impl SwapScheduler {
    pub fn new(interval: Duration, seed: u64) -> Self {
        Self {
            interval,
            round_start: None,
            next_swap: None,
            last_warning: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn start(&mut self, round_start: Instant) {
        self.round_start = Some(round_start);
        self.next_swap = Some(round_start + self.interval);
        self.last_warning = None;
    }

    pub fn stop(&mut self) {
        self.round_start = None;
        self.next_swap = None;
        self.last_warning = None;
    }

    pub fn is_running(&self) -> bool {
        self.round_start.is_some()
    }

    pub fn next_swap(&self) -> Option<Instant> {
        self.next_swap
    }

    /// Advance the schedule. `eligible` are the participants allowed to swap;
    /// with fewer than two the swap moves to the next interval boundary
    /// after `now`.
    pub fn tick(
        &mut self,
        now: Instant,
        eligible: &[PlayerId],
        players: &mut impl PlayerHost,
        invulnerability: &mut Invulnerability,
        invulnerability_ticks: u32,
    ) -> SwapTick {
        let (Some(start), Some(next)) = (self.round_start, self.next_swap) else {
            return SwapTick::Idle;
        };

        if eligible.len() < 2 {
            self.realign(start, now);
            return SwapTick::Idle;
        }

        if now >= next {
            let moved = self.perform(eligible, players, invulnerability, invulnerability_ticks);
            self.next_swap = Some(next + self.interval);
            self.last_warning = None;
            return SwapTick::Swapped(moved);
        }

        let seconds = ceil_seconds(next - now);
        if should_warn(seconds) && self.last_warning != Some(seconds) {
            self.last_warning = Some(seconds);
            return SwapTick::Warning(seconds);
        }
        SwapTick::Idle
    }

    fn realign(&mut self, start: Instant, now: Instant) {
        let interval = self.interval.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(start).as_nanos();
        let boundaries = (elapsed / interval + 1).min(u32::MAX as u128) as u32;
        self.next_swap = Some(start + self.interval * boundaries);
        self.last_warning = None;
    }

    fn perform(
        &mut self,
        eligible: &[PlayerId],
        players: &mut impl PlayerHost,
        invulnerability: &mut Invulnerability,
        invulnerability_ticks: u32,
    ) -> Vec<PlayerId> {
        let mut order: Vec<PlayerId> = eligible
            .iter()
            .copied()
            .filter(|id| players.location(*id).is_some())
            .collect();
        if order.len() < 2 {
            return Vec::new();
        }

        let snapshot: Vec<(PlayerId, Location, Location)> = order
            .iter()
            .filter_map(|id| {
                let at = players.location(*id)?;
                let respawn = players.respawn_point(*id).unwrap_or(at);
                Some((*id, at, respawn))
            })
            .collect();
        order.shuffle(&mut self.rng);

        for (mover, source) in cycle_assignment(&order) {
            let Some((_, at, respawn)) = snapshot.iter().find(|(id, _, _)| *id == source) else {
                continue;
            };
            players.teleport(mover, *at);
            players.set_respawn_point(mover, Some(*respawn));
            invulnerability.grant(players, mover, invulnerability_ticks);
        }
        tracing::info!("Swapped {} participants", order.len());
        order
    }
}
