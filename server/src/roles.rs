use lootrush_shared::model::{PlayerId, Role};
use std::collections::HashSet;

/// Role assignments. Anyone not marked as a spectator is a Player.
#[derive(Debug, Default)]
pub struct RoleBook {
    spectators: HashSet<PlayerId>,
}

impl RoleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self, id: PlayerId) -> Role {
        if self.spectators.contains(&id) {
            Role::Spectator
        } else {
            Role::Player
        }
    }

    pub fn is_player(&self, id: PlayerId) -> bool {
        !self.spectators.contains(&id)
    }

    /// Returns the previous role.
    pub fn set(&mut self, id: PlayerId, role: Role) -> Role {
        let previous = self.role(id);
        match role {
            Role::Player => {
                self.spectators.remove(&id);
            }
            Role::Spectator => {
                self.spectators.insert(id);
            }
        }
        previous
    }

    /// Split `ids` into (players, spectators), preserving order.
    pub fn partition(&self, ids: &[PlayerId]) -> (Vec<PlayerId>, Vec<PlayerId>) {
        ids.iter().copied().partition(|id| self.is_player(*id))
    }

    pub fn clear(&mut self) {
        self.spectators.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_identity_defaults_to_player() {
        let book = RoleBook::new();
        assert_eq!(book.role(PlayerId(9)), Role::Player);
    }

    #[test]
    fn set_returns_previous_role() {
        let mut book = RoleBook::new();
        assert_eq!(book.set(PlayerId(1), Role::Spectator), Role::Player);
        assert_eq!(book.role(PlayerId(1)), Role::Spectator);
        assert_eq!(book.set(PlayerId(1), Role::Player), Role::Spectator);
        assert!(book.is_player(PlayerId(1)));
    }

    #[test]
    fn marking_spectator_twice_is_idempotent() {
        let mut book = RoleBook::new();
        book.set(PlayerId(4), Role::Spectator);
        assert_eq!(book.set(PlayerId(4), Role::Spectator), Role::Spectator);
        book.set(PlayerId(4), Role::Player);
        assert!(book.is_player(PlayerId(4)));
    }

    #[test]
    fn partition_keeps_order() {
        let mut book = RoleBook::new();
        book.set(PlayerId(2), Role::Spectator);
        let ids = [PlayerId(3), PlayerId(2), PlayerId(1)];
        let (players, spectators) = book.partition(&ids);
        assert_eq!(players, vec![PlayerId(3), PlayerId(1)]);
        assert_eq!(spectators, vec![PlayerId(2)]);
    }

    #[test]
    fn clear_resets_everyone_to_player() {
        let mut book = RoleBook::new();
        book.set(PlayerId(1), Role::Spectator);
        book.clear();
        assert!(book.is_player(PlayerId(1)));
    }
}
