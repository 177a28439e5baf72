//! Chat rooms: bounded-in-time message logs and member fanout
//!
//! Private and group rooms share the same machinery: a member set, a
//! message log keyed by monotonic UTC timestamps, a fanout that enqueues
//! a payload on every live endpoint of every member present in the
//! manager's user map, and a background pruner dropping entries older
//! than a week.

pub mod group;
pub mod private;

use std::collections::BTreeMap;
use std::sync::{RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;

use crate::protocol::frame::DataPacket;
use crate::registry::manager::Manager;
use crate::registry::UserId;

// Re-export commonly used types
pub use group::GroupRoom;
pub use private::PrivateRoom;

/// Cadence of the background prune pass
const PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Age beyond which log entries are pruned
fn retention() -> TimeDelta {
    TimeDelta::days(7)
}

/// Classification of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// An ordinary chat message
    Normal,
    /// A system tip shown inline with the conversation
    Tip,
}

/// One stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub sender: UserId,
    pub message: String,
    pub kind: MessageKind,
}

/// Time-ordered message store
///
/// Keys are capture-time UTC timestamps; an append that would tie the
/// newest key is nudged forward one nanosecond so concurrent appends
/// always land on distinct, insertion-ordered keys.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: RwLock<BTreeMap<DateTime<Utc>, MessageRecord>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record under a fresh monotonic timestamp
    pub fn append(&self, record: MessageRecord) -> DateTime<Utc> {
        let mut entries = self.entries.write().expect("message log poisoned");
        let mut stamp = Utc::now();
        if let Some((&newest, _)) = entries.iter().next_back() {
            if stamp <= newest {
                stamp = newest + TimeDelta::nanoseconds(1);
            }
        }
        entries.insert(stamp, record);
        stamp
    }

    /// Copy out all entries with `from <= t <= to`, oldest first
    ///
    /// An inverted range yields an empty sequence.
    pub fn range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, MessageRecord)> {
        if from > to {
            return Vec::new();
        }
        let entries = self.entries.read().expect("message log poisoned");
        entries
            .range(from..=to)
            .map(|(stamp, record)| (*stamp, record.clone()))
            .collect()
    }

    /// Remove every entry strictly older than `cutoff`
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) {
        let mut entries = self.entries.write().expect("message log poisoned");
        let keep = entries.split_off(&cutoff);
        *entries = keep;
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("message log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Start the periodic prune task for a room's log
///
/// The task holds only a weak handle; it exits when the room is dropped
/// and is additionally aborted from the room's `Drop` so the timer does
/// not linger a full interval.
pub(crate) fn spawn_pruner(log: Weak<MessageLog>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(log) = log.upgrade() else { break };
            log.prune_older_than(Utc::now() - retention());
        }
    })
}

/// Enqueue a text payload on every endpoint of every listed member
///
/// Members missing from the manager's user map are skipped.
pub(crate) fn fan_out<'a>(
    manager: &Manager,
    members: impl IntoIterator<Item = &'a UserId>,
    payload: &str,
) {
    let packet = DataPacket::text(payload.to_owned()).encode_to_bytes();
    for member in members {
        if let Ok(user) = manager.get_user(*member) {
            user.send(packet.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_are_ordered_and_distinct() {
        let log = MessageLog::new();
        let mut stamps = Vec::new();
        for i in 0..50 {
            stamps.push(log.append(MessageRecord {
                sender: UserId(10000),
                message: format!("m{}", i),
                kind: MessageKind::Normal,
            }));
        }

        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(log.len(), 50);

        let all = log.range(stamps[0], stamps[49]);
        assert_eq!(all.len(), 50);
        assert_eq!(all[0].1.message, "m0");
        assert_eq!(all[49].1.message, "m49");
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let log = MessageLog::new();
        let stamp = log.append(MessageRecord {
            sender: UserId(10000),
            message: "hello".to_string(),
            kind: MessageKind::Normal,
        });
        assert!(log.range(stamp + TimeDelta::seconds(1), stamp).is_empty());
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let log = MessageLog::new();
        let first = log.append(MessageRecord {
            sender: UserId(10000),
            message: "a".to_string(),
            kind: MessageKind::Normal,
        });
        let second = log.append(MessageRecord {
            sender: UserId(10000),
            message: "b".to_string(),
            kind: MessageKind::Tip,
        });

        let hits = log.range(first, second);
        assert_eq!(hits.len(), 2);
        assert_eq!(log.range(first, first).len(), 1);
        assert_eq!(log.range(second, second)[0].1.kind, MessageKind::Tip);
    }

    #[test]
    fn test_prune_drops_only_old_entries() {
        let log = MessageLog::new();
        let first = log.append(MessageRecord {
            sender: UserId(10000),
            message: "old".to_string(),
            kind: MessageKind::Normal,
        });
        let second = log.append(MessageRecord {
            sender: UserId(10000),
            message: "new".to_string(),
            kind: MessageKind::Normal,
        });

        log.prune_older_than(second);
        assert_eq!(log.len(), 1);
        assert_eq!(log.range(first, second)[0].1.message, "new");
    }
}
