//! Multi-party chat room with an administrator and an open member set

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::{ChatError, Result};
use crate::registry::manager::Manager;
use crate::registry::{GroupId, UserId};
use crate::room::{fan_out, spawn_pruner, MessageKind, MessageLog, MessageRecord};

/// A group room: administrator, member set and message log
#[derive(Debug)]
pub struct GroupRoom {
    group_id: GroupId,
    administrator: UserId,
    members: RwLock<HashSet<UserId>>,
    usable: AtomicBool,
    log: Arc<MessageLog>,
    pruner: JoinHandle<()>,
}

impl GroupRoom {
    /// Create the room with its creator as administrator and first member
    pub(crate) fn new(group_id: GroupId, creator: UserId) -> Self {
        let log = Arc::new(MessageLog::new());
        let pruner = spawn_pruner(Arc::downgrade(&log));
        let mut members = HashSet::new();
        members.insert(creator);
        Self {
            group_id,
            administrator: creator,
            members: RwLock::new(members),
            usable: AtomicBool::new(true),
            log,
            pruner,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.usable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ChatError::GroupRoomUnableToUse)
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// The administrator fixed at creation
    pub fn administrator(&self) -> UserId {
        self.administrator
    }

    /// Add a member; false when already present
    pub fn add_member(&self, user_id: UserId) -> bool {
        self.members
            .write()
            .expect("group room poisoned")
            .insert(user_id)
    }

    /// Remove a member; false when not present
    pub fn remove_member(&self, user_id: UserId) -> bool {
        self.members
            .write()
            .expect("group room poisoned")
            .remove(&user_id)
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        self.members
            .read()
            .expect("group room poisoned")
            .contains(&user_id)
    }

    /// Snapshot of the member set
    pub fn member_ids(&self) -> Vec<UserId> {
        self.members
            .read()
            .expect("group room poisoned")
            .iter()
            .copied()
            .collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.read().expect("group room poisoned").len()
    }

    /// Append a normal message and fan it out to every member
    ///
    /// Senders outside the member set are ignored without error.
    pub fn send_message(&self, manager: &Manager, sender: UserId, message: &str) -> Result<()> {
        self.ensure_usable()?;
        if !self.has_member(sender) {
            return Ok(());
        }

        self.log.append(MessageRecord {
            sender,
            message: message.to_string(),
            kind: MessageKind::Normal,
        });

        let payload = json!({
            "type": "group_message",
            "data": { "user_id": sender, "message": message },
        });
        let members = self.member_ids();
        fan_out(manager, members.iter(), &payload.to_string());
        Ok(())
    }

    /// Append a tip message and fan it out to every member
    pub fn send_tip_message(
        &self,
        manager: &Manager,
        sender: UserId,
        message: &str,
    ) -> Result<()> {
        self.ensure_usable()?;
        if !self.has_member(sender) {
            return Ok(());
        }

        self.log.append(MessageRecord {
            sender,
            message: message.to_string(),
            kind: MessageKind::Tip,
        });

        let payload = json!({
            "type": "group_tip_message",
            "data": { "user_id": sender, "message": message },
        });
        let members = self.member_ids();
        fan_out(manager, members.iter(), &payload.to_string());
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

impl Drop for GroupRoom {
    fn drop(&mut self) {
        self.pruner.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_creator_is_administrator_and_member() {
        let room = GroupRoom::new(GroupId(10000), UserId(10000));
        assert_eq!(room.administrator(), UserId(10000));
        assert!(room.has_member(UserId(10000)));
        assert_eq!(room.member_count(), 1);
    }

    #[tokio::test]
    async fn test_add_member_is_idempotent() {
        let room = GroupRoom::new(GroupId(10000), UserId(10000));
        assert!(room.add_member(UserId(10001)));
        assert!(!room.add_member(UserId(10001)));
        assert_eq!(room.member_count(), 2);

        assert!(room.remove_member(UserId(10001)));
        assert!(!room.remove_member(UserId(10001)));
    }

    #[tokio::test]
    async fn test_messages_are_logged() {
        let manager = Manager::new();
        let room = GroupRoom::new(GroupId(10000), UserId(10000));
        room.add_member(UserId(10001));

        room.send_message(&manager, UserId(10001), "hello").unwrap();
        room.send_message(&manager, UserId(12345), "stranger").unwrap();
        assert_eq!(room.message_count(), 1);

        let now = Utc::now();
        let entries = room
            .messages_between(now - TimeDelta::minutes(1), now + TimeDelta::minutes(1))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.sender, UserId(10001));
    }

    #[tokio::test]
    async fn test_removed_room_rejects_everything() {
        let manager = Manager::new();
        let room = GroupRoom::new(GroupId(10000), UserId(10000));
        room.remove_this_room();

        assert_eq!(
            room.send_message(&manager, UserId(10000), "x").unwrap_err(),
            ChatError::GroupRoomUnableToUse
        );
        let now = Utc::now();
        assert_eq!(
            room.messages_between(now, now).unwrap_err(),
            ChatError::GroupRoomUnableToUse
        );
    }
}
