use lootrush_shared::model::PlayerId;
use std::collections::HashMap;

/// What a death did to a participant's lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeLoss {
    Remaining(u32),
    /// This death took the last life.
    Eliminated,
    /// Already at zero; nothing changed.
    AlreadyOut,
}

/// Lives per participant, always within `0..=max`.
#[derive(Debug)]
pub struct LivesLedger {
    max: u32,
    lives: HashMap<PlayerId, u32>,
}

impl LivesLedger {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            lives: HashMap::new(),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Replace the ledger with full lives for `participants`.
    pub fn reset(&mut self, participants: &[PlayerId]) {
        self.lives.clear();
        for id in participants {
            self.lives.insert(*id, self.max);
        }
    }

    pub fn grant_full(&mut self, id: PlayerId) {
        self.lives.insert(id, self.max);
    }

    /// Identities without an entry count as having full lives.
    pub fn lives(&self, id: PlayerId) -> u32 {
        self.lives.get(&id).copied().unwrap_or(self.max)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.lives.contains_key(&id)
    }

    pub fn has_lives(&self, id: PlayerId) -> bool {
        self.lives(id) > 0
    }

    pub fn lose_one(&mut self, id: PlayerId) -> LifeLoss {
        let current = self.lives(id);
        if current == 0 {
            return LifeLoss::AlreadyOut;
        }
        let left = current - 1;
        self.lives.insert(id, left);
        if left == 0 {
            LifeLoss::Eliminated
        } else {
            LifeLoss::Remaining(left)
        }
    }

    pub fn clear(&mut self) {
        self.lives.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lives.is_empty()
    }
}
