//! User identity, credentials, live endpoints and pending verifications
//!
//! A user is the durable side of the connection/user split: connections
//! come and go, the user object accumulates friends, groups and the set
//! of endpoints currently logged in for it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::Serialize;

use crate::error::{ChatError, Result};
use crate::registry::{GroupId, UserId};
use crate::transport::connection::{Connection, ConnectionId};

/// Kind of client device attached to an endpoint
///
/// Derived from a case-sensitive match of the login `device` string;
/// anything unrecognized maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    PersonalComputer,
    Phone,
    Web,
    Unknown,
}

impl DeviceKind {
    /// Parse the `device` string carried by a login request
    pub fn from_login_str(value: &str) -> Self {
        match value {
            "PersonalComputer" => DeviceKind::PersonalComputer,
            "Phone" => DeviceKind::Phone,
            "Web" => DeviceKind::Web,
            _ => DeviceKind::Unknown,
        }
    }
}

/// Direction of a pending verification as seen by its holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationDirection {
    Sent,
    Received,
}

/// Pending friend request entry mirrored onto a user
#[derive(Debug, Clone, Serialize)]
pub struct FriendVerificationNote {
    pub user_id: UserId,
    pub direction: VerificationDirection,
}

/// Pending group-join request entry mirrored onto a user
#[derive(Debug, Clone, Serialize)]
pub struct GroupVerificationNote {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub direction: VerificationDirection,
}

/// A live endpoint: one logged-in connection plus its device kind
#[derive(Debug, Clone)]
pub struct UserEndpoint {
    pub connection: Arc<Connection>,
    pub device: DeviceKind,
}

/// A registered user
#[derive(Debug)]
pub struct User {
    id: UserId,
    password: RwLock<Option<String>>,
    friends: RwLock<HashSet<UserId>>,
    groups: RwLock<HashSet<GroupId>>,
    friend_verifications: RwLock<HashMap<UserId, FriendVerificationNote>>,
    group_verifications: RwLock<HashMap<(GroupId, UserId), GroupVerificationNote>>,
    endpoints: RwLock<HashMap<ConnectionId, UserEndpoint>>,
}

impl User {
    /// Create a user with no password and empty lists
    pub(crate) fn new(id: UserId) -> Self {
        Self {
            id,
            password: RwLock::new(None),
            friends: RwLock::new(HashSet::new()),
            groups: RwLock::new(HashSet::new()),
            friend_verifications: RwLock::new(HashMap::new()),
            group_verifications: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Set the password; a user's password may only be set once
    pub fn first_set_password(&self, password: impl Into<String>) -> Result<()> {
        let mut slot = self.password.write().expect("user lock poisoned");
        if slot.is_some() {
            return Err(ChatError::PasswordAlreadySet);
        }
        *slot = Some(password.into());
        Ok(())
    }

    /// Verify a password in constant time; false while no password is set
    pub fn is_user_password(&self, candidate: &str) -> bool {
        let slot = self.password.read().expect("user lock poisoned");
        match slot.as_deref() {
            Some(stored) => constant_time_eq(stored.as_bytes(), candidate.as_bytes()),
            None => false,
        }
    }

    // =========================================================================
    // Friend and group sets
    // =========================================================================

    /// Mutate the friend set under its lock
    pub fn update_friend_list(&self, mutate: impl FnOnce(&mut HashSet<UserId>)) {
        let mut friends = self.friends.write().expect("user lock poisoned");
        mutate(&mut friends);
    }

    pub fn has_friend(&self, user_id: UserId) -> bool {
        self.friends
            .read()
            .expect("user lock poisoned")
            .contains(&user_id)
    }

    /// Snapshot of the friend set, sorted for stable replies
    pub fn friend_list(&self) -> Vec<UserId> {
        let mut list: Vec<UserId> = self
            .friends
            .read()
            .expect("user lock poisoned")
            .iter()
            .copied()
            .collect();
        list.sort();
        list
    }

    /// Mutate the group set under its lock
    pub fn update_group_list(&self, mutate: impl FnOnce(&mut HashSet<GroupId>)) {
        let mut groups = self.groups.write().expect("user lock poisoned");
        mutate(&mut groups);
    }

    pub fn has_group(&self, group_id: GroupId) -> bool {
        self.groups
            .read()
            .expect("user lock poisoned")
            .contains(&group_id)
    }

    /// Snapshot of the group set, sorted for stable replies
    pub fn group_list(&self) -> Vec<GroupId> {
        let mut list: Vec<GroupId> = self
            .groups
            .read()
            .expect("user lock poisoned")
            .iter()
            .copied()
            .collect();
        list.sort();
        list
    }

    // =========================================================================
    // Pending verifications
    // =========================================================================

    pub fn add_friend_verification(&self, other: UserId, note: FriendVerificationNote) {
        self.friend_verifications
            .write()
            .expect("user lock poisoned")
            .insert(other, note);
    }

    pub fn remove_friend_verification(&self, other: UserId) {
        self.friend_verifications
            .write()
            .expect("user lock poisoned")
            .remove(&other);
    }

    pub fn has_friend_verification(&self, other: UserId) -> bool {
        self.friend_verifications
            .read()
            .expect("user lock poisoned")
            .contains_key(&other)
    }

    pub fn friend_verification_list(&self) -> Vec<FriendVerificationNote> {
        let mut list: Vec<FriendVerificationNote> = self
            .friend_verifications
            .read()
            .expect("user lock poisoned")
            .values()
            .cloned()
            .collect();
        list.sort_by_key(|note| note.user_id);
        list
    }

    pub fn add_group_verification(
        &self,
        group_id: GroupId,
        applicant: UserId,
        note: GroupVerificationNote,
    ) {
        self.group_verifications
            .write()
            .expect("user lock poisoned")
            .insert((group_id, applicant), note);
    }

    pub fn remove_group_verification(&self, group_id: GroupId, applicant: UserId) {
        self.group_verifications
            .write()
            .expect("user lock poisoned")
            .remove(&(group_id, applicant));
    }

    pub fn has_group_verification(&self, group_id: GroupId, applicant: UserId) -> bool {
        self.group_verifications
            .read()
            .expect("user lock poisoned")
            .contains_key(&(group_id, applicant))
    }

    pub fn group_verification_list(&self) -> Vec<GroupVerificationNote> {
        let mut list: Vec<GroupVerificationNote> = self
            .group_verifications
            .read()
            .expect("user lock poisoned")
            .values()
            .cloned()
            .collect();
        list.sort_by_key(|note| (note.group_id, note.user_id));
        list
    }

    // =========================================================================
    // Live endpoints
    // =========================================================================

    /// Attach a logged-in connection with its device kind
    pub fn add_connection(&self, connection: Arc<Connection>, device: DeviceKind) {
        self.endpoints
            .write()
            .expect("user lock poisoned")
            .insert(connection.id(), UserEndpoint { connection, device });
    }

    /// Detach a connection; a no-op when it was not attached
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        self.endpoints
            .write()
            .expect("user lock poisoned")
            .remove(&connection_id);
    }

    pub fn has_connection(&self, connection_id: ConnectionId) -> bool {
        self.endpoints
            .read()
            .expect("user lock poisoned")
            .contains_key(&connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.endpoints.read().expect("user lock poisoned").len()
    }

    /// Device kind of an attached connection
    pub fn device_of_connection(&self, connection_id: ConnectionId) -> Option<DeviceKind> {
        self.endpoints
            .read()
            .expect("user lock poisoned")
            .get(&connection_id)
            .map(|endpoint| endpoint.device)
    }

    /// Enqueue the bytes on every live endpoint's serialized write path
    pub fn send(&self, data: Bytes) {
        let endpoints = self.endpoints.read().expect("user lock poisoned");
        for endpoint in endpoints.values() {
            endpoint.connection.send(data.clone());
        }
    }
}

/// Compare two byte strings without early exit on mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
