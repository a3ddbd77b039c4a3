use lootrush_shared::model::PlayerId;
use std::collections::HashMap;

use crate::host::PlayerHost;

/// Temporary damage immunity after a teleport, counted in simulation ticks.
#[derive(Debug, Default)]
pub struct Invulnerability {
    remaining: HashMap<PlayerId, u32>,
}

impl Invulnerability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` invulnerable for `ticks` ticks, replacing any running grant.
    pub fn grant(&mut self, host: &mut impl PlayerHost, id: PlayerId, ticks: u32) {
        if ticks == 0 {
            return;
        }
        host.set_invulnerable(id, true);
        self.remaining.insert(id, ticks);
    }

    /// Advance one tick. Grants that run out are revoked on the host.
    pub fn tick(&mut self, host: &mut impl PlayerHost) {
        let mut expired = Vec::new();
        for (id, left) in self.remaining.iter_mut() {
            *left -= 1;
            if *left == 0 {
                expired.push(*id);
            }
        }
        for id in expired {
            self.remaining.remove(&id);
            if host.is_online(id) {
                host.set_invulnerable(id, false);
            }
        }
    }

    /// Forget a player who left. The host flag goes with them.
    pub fn remove(&mut self, id: PlayerId) {
        self.remaining.remove(&id);
    }

    pub fn revoke_all(&mut self, host: &mut impl PlayerHost) {
        for (id, _) in self.remaining.drain() {
            if host.is_online(id) {
                host.set_invulnerable(id, false);
            }
        }
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.remaining.contains_key(&id)
    }

    pub fn remaining(&self, id: PlayerId) -> Option<u32> {
        self.remaining.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}
