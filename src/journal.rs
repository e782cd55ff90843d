use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;

use crate::hash::Hash;

const SUBSCRIBER_BUFFER: usize = 64;

/// One recorded change of the working copy's parent commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalDelta {
    pub sequence: u64,
    pub from_hash: Hash,
    pub to_hash: Hash,
    pub time: SystemTime,
}

#[derive(Debug, Default)]
struct JournalState {
    entries: Vec<Arc<JournalDelta>>,
    next_sequence: u64,
}

/// Append-only, in-memory log of parent-commit transitions.
#[derive(Debug)]
pub struct Journal {
    state: Mutex<JournalState>,
    subscribers: broadcast::Sender<Arc<JournalDelta>>,
}

impl Journal {
    pub fn new() -> Self {
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Journal {
            state: Mutex::new(JournalState {
                entries: Vec::new(),
                next_sequence: 1,
            }),
            subscribers,
        }
    }

    /// Record a transition and notify subscribers. Returns the stored delta.
    pub fn record_hash_update(&self, from_hash: Hash, to_hash: Hash, time: SystemTime) -> Arc<JournalDelta> {
        let delta = {
            let mut state = self.state.lock();
            let delta = Arc::new(JournalDelta {
                sequence: state.next_sequence,
                from_hash,
                to_hash,
                time,
            });
            state.next_sequence += 1;
            state.entries.push(Arc::clone(&delta));
            delta
        };

        tracing::debug!(
            "journal: #{} {} -> {}",
            delta.sequence,
            delta.from_hash,
            delta.to_hash
        );
        // No receivers is the normal case.
        let _ = self.subscribers.send(Arc::clone(&delta));
        delta
    }

    pub fn latest(&self) -> Option<Arc<JournalDelta>> {
        self.state.lock().entries.last().cloned()
    }

    /// All deltas with a sequence number greater than `sequence`.
    pub fn entries_since(&self, sequence: u64) -> Vec<Arc<JournalDelta>> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|delta| delta.sequence > sequence)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<JournalDelta>> {
        self.subscribers.subscribe()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> Hash {
        Hash::from_partial_hex(s).unwrap()
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let journal = Journal::new();
        assert!(journal.latest().is_none());

        journal.record_hash_update(hash("1"), hash("1"), SystemTime::UNIX_EPOCH);
        journal.record_hash_update(hash("1"), hash("2"), SystemTime::UNIX_EPOCH);

        let latest = journal.latest().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.from_hash, hash("1"));
        assert_eq!(latest.to_hash, hash("2"));
        assert_eq!(journal.len(), 2);
    }

    #[test]
    fn test_entries_since() {
        let journal = Journal::new();
        for i in 1..=4 {
            journal.record_hash_update(hash("1"), hash(&i.to_string()), SystemTime::UNIX_EPOCH);
        }

        let tail = journal.entries_since(2);
        let sequences: Vec<u64> = tail.iter().map(|d| d.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
        assert!(journal.entries_since(4).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_new_deltas() {
        let journal = Journal::new();
        let mut rx = journal.subscribe();

        journal.record_hash_update(hash("a"), hash("b"), SystemTime::UNIX_EPOCH);

        let delta = rx.recv().await.unwrap();
        assert_eq!(delta.to_hash, hash("b"));
    }
}
