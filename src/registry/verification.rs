//! Pending friend and group-join requests and their resolution
//!
//! Each request lives as a pending record keyed by (applicant,
//! controller). Acceptance flips the record true exactly once, consumes
//! it (friendship or membership is established) and removes the record
//! together with the mirror entries on the affected users' pending
//! lists. Rejection removes without consuming. Terminal states are
//! absence from the map.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{ChatError, Result};
use crate::registry::manager::Manager;
use crate::registry::user::{
    FriendVerificationNote, GroupVerificationNote, VerificationDirection,
};
use crate::registry::{GroupId, UserId};

/// Pending verification registry
#[derive(Debug, Default)]
pub struct VerificationManager {
    /// `(applicant, controller user) → accepted`
    friend_requests: RwLock<HashMap<(UserId, UserId), bool>>,
    /// `(applicant, controller group) → accepted`
    group_requests: RwLock<HashMap<(UserId, GroupId), bool>>,
}

impl VerificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Friend verifications
    // =========================================================================

    /// File a friend request from `sender` to `receiver`
    pub fn apply_friend_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: UserId,
    ) -> Result<()> {
        if sender == receiver {
            return Err(ChatError::InvalidVerification);
        }
        if !manager.has_user(sender) || !manager.has_user(receiver) {
            return Err(ChatError::UserNotExisted);
        }
        if manager.has_private_room(sender, receiver) {
            return Err(ChatError::PrivateRoomExisted);
        }

        {
            let mut requests = self.friend_requests.write().expect("verification poisoned");
            if requests.contains_key(&(sender, receiver)) {
                return Err(ChatError::VerificationExisted);
            }
            requests.insert((sender, receiver), false);
        }

        manager.get_user(sender)?.add_friend_verification(
            receiver,
            FriendVerificationNote {
                user_id: receiver,
                direction: VerificationDirection::Sent,
            },
        );
        manager.get_user(receiver)?.add_friend_verification(
            sender,
            FriendVerificationNote {
                user_id: sender,
                direction: VerificationDirection::Received,
            },
        );
        Ok(())
    }

    pub fn has_friend_verification(&self, sender: UserId, receiver: UserId) -> bool {
        if sender == receiver {
            return false;
        }
        self.friend_requests
            .read()
            .expect("verification poisoned")
            .contains_key(&(sender, receiver))
    }

    /// Accept: record flips true, the friendship is consumed, record and
    /// mirrors disappear
    pub fn accept_friend_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: UserId,
    ) -> Result<()> {
        if sender == receiver {
            return Err(ChatError::InvalidVerification);
        }

        {
            let mut requests = self.friend_requests.write().expect("verification poisoned");
            let accepted = requests
                .get_mut(&(sender, receiver))
                .ok_or(ChatError::VerificationNotExisted)?;
            *accepted = true;
        }

        manager.add_private_room(sender, receiver);
        manager.get_user(sender)?.update_friend_list(|set| {
            set.insert(receiver);
        });
        manager.get_user(receiver)?.update_friend_list(|set| {
            set.insert(sender);
        });

        self.remove_friend_verification(manager, sender, receiver)
    }

    /// Reject: the record and both mirrors disappear unconsumed
    pub fn reject_friend_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: UserId,
    ) -> Result<()> {
        if sender == receiver {
            return Err(ChatError::InvalidVerification);
        }
        self.remove_friend_verification(manager, sender, receiver)
    }

    /// Whether the pending record has been accepted
    pub fn is_friend_verified(&self, sender: UserId, receiver: UserId) -> Result<bool> {
        if sender == receiver {
            return Err(ChatError::InvalidVerification);
        }
        self.friend_requests
            .read()
            .expect("verification poisoned")
            .get(&(sender, receiver))
            .copied()
            .ok_or(ChatError::VerificationNotExisted)
    }

    /// Drop the record and purge both mirror entries
    pub fn remove_friend_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: UserId,
    ) -> Result<()> {
        if sender == receiver {
            return Err(ChatError::InvalidVerification);
        }

        {
            let mut requests = self.friend_requests.write().expect("verification poisoned");
            if requests.remove(&(sender, receiver)).is_none() {
                return Ok(());
            }
        }

        manager.get_user(sender)?.remove_friend_verification(receiver);
        manager.get_user(receiver)?.remove_friend_verification(sender);
        Ok(())
    }

    // =========================================================================
    // Group verifications
    // =========================================================================

    /// File a join request from `sender` to the group `receiver`
    ///
    /// The `Received` mirror lands only on the group's current
    /// administrator, not on every member.
    pub fn apply_group_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: GroupId,
    ) -> Result<()> {
        if !manager.has_group_room(receiver) {
            return Err(ChatError::GroupRoomNotExisted);
        }
        if !manager.has_user(sender) {
            return Err(ChatError::UserNotExisted);
        }

        {
            let mut requests = self.group_requests.write().expect("verification poisoned");
            if requests.contains_key(&(sender, receiver)) {
                return Err(ChatError::VerificationExisted);
            }
            requests.insert((sender, receiver), false);
        }

        manager.get_user(sender)?.add_group_verification(
            receiver,
            sender,
            GroupVerificationNote {
                group_id: receiver,
                user_id: sender,
                direction: VerificationDirection::Sent,
            },
        );

        let admin = manager.get_group_room(receiver)?.administrator();
        manager.get_user(admin)?.add_group_verification(
            receiver,
            sender,
            GroupVerificationNote {
                group_id: receiver,
                user_id: sender,
                direction: VerificationDirection::Received,
            },
        );
        Ok(())
    }

    pub fn has_group_verification(&self, sender: UserId, receiver: GroupId) -> bool {
        self.group_requests
            .read()
            .expect("verification poisoned")
            .contains_key(&(sender, receiver))
    }

    /// Accept: membership is established and the record consumed
    pub fn accept_group_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: GroupId,
    ) -> Result<()> {
        {
            let mut requests = self.group_requests.write().expect("verification poisoned");
            let accepted = requests
                .get_mut(&(sender, receiver))
                .ok_or(ChatError::VerificationNotExisted)?;
            *accepted = true;
        }

        let _ = manager.get_group_room(receiver)?.add_member(sender);
        manager.get_user(sender)?.update_group_list(|set| {
            set.insert(receiver);
        });

        self.remove_group_verification(manager, sender, receiver)
    }

    /// Reject: the record and its mirrors disappear unconsumed
    pub fn reject_group_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: GroupId,
    ) -> Result<()> {
        self.remove_group_verification(manager, sender, receiver)
    }

    /// Whether the pending record has been accepted
    pub fn is_group_verified(&self, sender: UserId, receiver: GroupId) -> Result<bool> {
        self.group_requests
            .read()
            .expect("verification poisoned")
            .get(&(sender, receiver))
            .copied()
            .ok_or(ChatError::VerificationNotExisted)
    }

    /// Drop the record and purge the applicant's and administrator's
    /// mirror entries
    pub fn remove_group_verification(
        &self,
        manager: &Manager,
        sender: UserId,
        receiver: GroupId,
    ) -> Result<()> {
        {
            let mut requests = self.group_requests.write().expect("verification poisoned");
            if requests.remove(&(sender, receiver)).is_none() {
                return Err(ChatError::VerificationNotExisted);
            }
        }

        let admin = manager.get_group_room(receiver)?.administrator();
        manager
            .get_user(admin)?
            .remove_group_verification(receiver, sender);
        manager
            .get_user(sender)?
            .remove_group_verification(receiver, sender);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_friend_verification_lifecycle() {
        let manager = Manager::new();
        let a = manager.add_new_user().id();
        let b = manager.add_new_user().id();
        let verifications = manager.verifications();

        verifications
            .apply_friend_verification(&manager, a, b)
            .unwrap();
        assert!(verifications.has_friend_verification(a, b));
        assert!(!verifications.is_friend_verified(a, b).unwrap());

        // both sides see the mirrors with their directions
        let sent = manager.get_user(a).unwrap().friend_verification_list();
        assert_eq!(sent[0].direction, VerificationDirection::Sent);
        assert_eq!(sent[0].user_id, b);
        let received = manager.get_user(b).unwrap().friend_verification_list();
        assert_eq!(received[0].direction, VerificationDirection::Received);
        assert_eq!(received[0].user_id, a);

        verifications
            .accept_friend_verification(&manager, a, b)
            .unwrap();

        assert!(manager.get_user(a).unwrap().has_friend(b));
        assert!(manager.get_user(b).unwrap().has_friend(a));
        assert!(manager.has_private_room(a, b));
        assert!(!verifications.has_friend_verification(a, b));
        assert!(manager
            .get_user(a)
            .unwrap()
            .friend_verification_list()
            .is_empty());
        assert_eq!(
            verifications.is_friend_verified(a, b).unwrap_err(),
            ChatError::VerificationNotExisted
        );
    }

    #[tokio::test]
    async fn test_friend_apply_guards() {
        let manager = Manager::new();
        let a = manager.add_new_user().id();
        let b = manager.add_new_user().id();
        let verifications = manager.verifications();

        assert_eq!(
            verifications
                .apply_friend_verification(&manager, a, a)
                .unwrap_err(),
            ChatError::InvalidVerification
        );
        assert_eq!(
            verifications
                .apply_friend_verification(&manager, a, UserId(9))
                .unwrap_err(),
            ChatError::UserNotExisted
        );

        verifications
            .apply_friend_verification(&manager, a, b)
            .unwrap();
        assert_eq!(
            verifications
                .apply_friend_verification(&manager, a, b)
                .unwrap_err(),
            ChatError::VerificationExisted
        );

        verifications
            .accept_friend_verification(&manager, a, b)
            .unwrap();
        // an established pair cannot re-apply: the private room exists
        assert_eq!(
            verifications
                .apply_friend_verification(&manager, a, b)
                .unwrap_err(),
            ChatError::PrivateRoomExisted
        );
        assert_eq!(
            verifications
                .apply_friend_verification(&manager, b, a)
                .unwrap_err(),
            ChatError::PrivateRoomExisted
        );
    }

    #[tokio::test]
    async fn test_friend_rejection_leaves_no_trace() {
        let manager = Manager::new();
        let a = manager.add_new_user().id();
        let b = manager.add_new_user().id();
        let verifications = manager.verifications();

        verifications
            .apply_friend_verification(&manager, a, b)
            .unwrap();
        verifications
            .reject_friend_verification(&manager, a, b)
            .unwrap();

        assert!(!verifications.has_friend_verification(a, b));
        assert!(!manager.get_user(a).unwrap().has_friend(b));
        assert!(!manager.has_private_room(a, b));
        assert!(manager
            .get_user(b)
            .unwrap()
            .friend_verification_list()
            .is_empty());
    }

    #[tokio::test]
    async fn test_group_verification_lifecycle() {
        let manager = Manager::new();
        let admin = manager.add_new_user().id();
        let applicant = manager.add_new_user().id();
        let group = manager.add_group_room(admin);
        let verifications = manager.verifications();

        verifications
            .apply_group_verification(&manager, applicant, group)
            .unwrap();
        assert!(verifications.has_group_verification(applicant, group));
        assert!(!verifications.is_group_verified(applicant, group).unwrap());

        // the Received mirror lands only on the administrator
        assert!(manager
            .get_user(admin)
            .unwrap()
            .has_group_verification(group, applicant));
        let applicant_notes = manager
            .get_user(applicant)
            .unwrap()
            .group_verification_list();
        assert_eq!(applicant_notes[0].direction, VerificationDirection::Sent);

        verifications
            .accept_group_verification(&manager, applicant, group)
            .unwrap();

        assert!(manager.get_group_room(group).unwrap().has_member(applicant));
        assert!(manager.get_user(applicant).unwrap().has_group(group));
        assert!(!verifications.has_group_verification(applicant, group));
        assert_eq!(
            verifications.is_group_verified(applicant, group).unwrap_err(),
            ChatError::VerificationNotExisted
        );
        assert!(!manager
            .get_user(admin)
            .unwrap()
            .has_group_verification(group, applicant));
    }

    #[tokio::test]
    async fn test_group_apply_guards() {
        let manager = Manager::new();
        let admin = manager.add_new_user().id();
        let applicant = manager.add_new_user().id();
        let group = manager.add_group_room(admin);
        let verifications = manager.verifications();

        assert_eq!(
            verifications
                .apply_group_verification(&manager, applicant, GroupId(1))
                .unwrap_err(),
            ChatError::GroupRoomNotExisted
        );
        assert_eq!(
            verifications
                .apply_group_verification(&manager, UserId(1), group)
                .unwrap_err(),
            ChatError::UserNotExisted
        );

        verifications
            .apply_group_verification(&manager, applicant, group)
            .unwrap();
        assert_eq!(
            verifications
                .apply_group_verification(&manager, applicant, group)
                .unwrap_err(),
            ChatError::VerificationExisted
        );

        verifications
            .reject_group_verification(&manager, applicant, group)
            .unwrap();
        assert_eq!(
            verifications
                .reject_group_verification(&manager, applicant, group)
                .unwrap_err(),
            ChatError::VerificationNotExisted
        );
    }
}
