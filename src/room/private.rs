//! One-to-one chat room between a fixed pair of users

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::{ChatError, Result};
use crate::registry::manager::Manager;
use crate::registry::UserId;
use crate::room::{fan_out, spawn_pruner, MessageKind, MessageLog, MessageRecord};

/// A private room: an unordered pair of members plus their message log
#[derive(Debug)]
pub struct PrivateRoom {
    user_a: UserId,
    user_b: UserId,
    usable: AtomicBool,
    log: Arc<MessageLog>,
    pruner: JoinHandle<()>,
}

impl PrivateRoom {
    /// Create the room for a user pair and start its pruner
    pub(crate) fn new(user_a: UserId, user_b: UserId) -> Self {
        let log = Arc::new(MessageLog::new());
        let pruner = spawn_pruner(Arc::downgrade(&log));
        Self {
            user_a,
            user_b,
            usable: AtomicBool::new(true),
            log,
            pruner,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.usable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ChatError::PrivateRoomUnableToUse)
        }
    }

    fn is_member(&self, user_id: UserId) -> bool {
        user_id == self.user_a || user_id == self.user_b
    }

    /// The member pair, in construction order
    pub fn user_ids(&self) -> Result<(UserId, UserId)> {
        self.ensure_usable()?;
        Ok((self.user_a, self.user_b))
    }

    /// Whether the given user is one of the pair
    pub fn has_member(&self, user_id: UserId) -> Result<bool> {
        self.ensure_usable()?;
        Ok(self.is_member(user_id))
    }

    /// Append a normal message and fan it out to both members
    ///
    /// Senders outside the pair are ignored without error.
    pub fn send_message(&self, manager: &Manager, sender: UserId, message: &str) -> Result<()> {
        self.ensure_usable()?;
        if !self.is_member(sender) {
            return Ok(());
        }

        self.log.append(MessageRecord {
            sender,
            message: message.to_string(),
            kind: MessageKind::Normal,
        });

        let payload = json!({
            "type": "private_message",
            "data": { "user_id": sender, "message": message },
        });
        fan_out(manager, [&self.user_a, &self.user_b], &payload.to_string());
        Ok(())
    }

    /// Append a tip message and fan it out to both members
    pub fn send_tip_message(
        &self,
        manager: &Manager,
        sender: UserId,
        message: &str,
    ) -> Result<()> {
        self.ensure_usable()?;
        if !self.is_member(sender) {
            return Ok(());
        }

        self.log.append(MessageRecord {
            sender,
            message: message.to_string(),
            kind: MessageKind::Tip,
        });

        let payload = json!({
            "type": "private_tip_message",
            "data": { "user_id": sender, "message": message },
        });
        fan_out(manager, [&self.user_a, &self.user_b], &payload.to_string());
        Ok(())
    }

    /// Copy out the log entries with `from <= t <= to`, oldest first
    pub fn messages_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, MessageRecord)>> {
        self.ensure_usable()?;
        Ok(self.log.range(from, to))
    }

    /// Number of stored messages (test and diagnostics helper)
    pub fn message_count(&self) -> usize {
        self.log.len()
    }

    /// Flip the usable flag; every later send or read fails
    pub fn remove_this_room(&self) {
        self.usable.store(false, Ordering::Release);
    }

    pub fn can_be_used(&self) -> bool {
        self.usable.load(Ordering::Acquire)
    }
}

impl Drop for PrivateRoom {
    fn drop(&mut self) {
        self.pruner.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_membership_is_the_fixed_pair() {
        let room = PrivateRoom::new(UserId(10000), UserId(10001));
        assert!(room.has_member(UserId(10000)).unwrap());
        assert!(room.has_member(UserId(10001)).unwrap());
        assert!(!room.has_member(UserId(10002)).unwrap());
        assert_eq!(room.user_ids().unwrap(), (UserId(10000), UserId(10001)));
    }

    #[tokio::test]
    async fn test_send_from_stranger_is_ignored() {
        let manager = Manager::new();
        let room = PrivateRoom::new(UserId(10000), UserId(10001));

        room.send_message(&manager, UserId(12345), "hi").unwrap();
        assert_eq!(room.message_count(), 0);
    }

    #[tokio::test]
    async fn test_messages_are_logged_and_readable() {
        let manager = Manager::new();
        let room = PrivateRoom::new(UserId(10000), UserId(10001));

        room.send_message(&manager, UserId(10000), "hello").unwrap();
        room.send_tip_message(&manager, UserId(10001), "joined").unwrap();
        assert_eq!(room.message_count(), 2);

        let now = Utc::now();
        let entries = room
            .messages_between(now - TimeDelta::minutes(1), now + TimeDelta::minutes(1))
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.kind, MessageKind::Normal);
        assert_eq!(entries[0].1.sender, UserId(10000));
        assert_eq!(entries[1].1.kind, MessageKind::Tip);
    }

    #[tokio::test]
    async fn test_removed_room_rejects_everything() {
        let manager = Manager::new();
        let room = PrivateRoom::new(UserId(10000), UserId(10001));
        assert!(room.can_be_used());

        room.remove_this_room();
        assert!(!room.can_be_used());

        assert_eq!(
            room.send_message(&manager, UserId(10000), "x").unwrap_err(),
            ChatError::PrivateRoomUnableToUse
        );
        let now = Utc::now();
        assert_eq!(
            room.messages_between(now, now).unwrap_err(),
            ChatError::PrivateRoomUnableToUse
        );
        assert_eq!(
            room.user_ids().unwrap_err(),
            ChatError::PrivateRoomUnableToUse
        );
    }
}
