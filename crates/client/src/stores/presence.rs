//! Presence set: who is connected right now.

use std::collections::HashSet;

/// Ephemeral set of online user ids, rebuilt from socket events.
///
/// Only meaningful while the local socket is connected; the owner clears it
/// whenever the connection drops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceSet {
    online: HashSet<String>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single `presenceUpdate`. Returns true if the set changed.
    pub fn apply(&mut self, user_id: &str, online: bool) -> bool {
        if online {
            self.online.insert(user_id.to_string())
        } else {
            self.online.remove(user_id)
        }
    }

    /// Replace the set with an `onlineUsers` snapshot.
    pub fn replace(&mut self, user_ids: impl IntoIterator<Item = String>) {
        self.online = user_ids.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    /// Sorted snapshot, for display.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.online.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_and_snapshots() {
        let mut presence = PresenceSet::new();
        presence.replace(vec!["b".to_string(), "a".to_string()]);
        assert!(presence.apply("c", true));
        assert!(!presence.apply("c", true));
        assert!(presence.apply("a", false));
        assert_eq!(presence.snapshot(), vec!["b", "c"]);

        presence.clear();
        assert!(presence.is_empty());
        assert!(!presence.is_online("b"));
    }
}
