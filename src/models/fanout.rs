//! Request-scoped fan-out deduplication set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// IDs already charged in the current call chain (primary items plus their
/// linked translations).
///
/// Threaded through coordinator calls as an explicit parameter and echoed in
/// the response; never persisted and never ambient global state. Membership
/// is claimed *before* the API call is issued, which closes the race between
/// marking and the network round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FanoutSet {
    ids: HashSet<u64>,
}

impl FanoutSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Claim an ID. Returns false when it was already claimed.
    pub fn claim(&mut self, id: u64) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorted snapshot for the response envelope.
    pub fn to_vec(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.ids.iter().copied().collect();
        v.sort_unstable();
        v
    }
}

impl From<Vec<u64>> for FanoutSet {
    fn from(ids: Vec<u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }
}

impl FromIterator<u64> for FanoutSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_idempotent() {
        let mut set = FanoutSet::new();
        assert!(set.claim(10));
        assert!(!set.claim(10));
        assert!(set.contains(10));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn round_trips_through_vec() {
        let set: FanoutSet = vec![3, 1, 2, 1].into();
        assert_eq!(set.to_vec(), vec![1, 2, 3]);
    }
}
