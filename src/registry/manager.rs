//! Central registry of users, rooms and connection bindings
//!
//! The manager owns the authoritative connection → user binding; user
//! objects hold endpoint entries that `modify_user_of_connection` and
//! `remove_connection` keep consistent with it.
//!
//! Every map sits behind its own reader/writer lock. Operations that
//! need more than one map take the locks in this fixed order:
//! connections → users → group rooms → private rooms → pair index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{ChatError, Result};
use crate::registry::user::{DeviceKind, User};
use crate::registry::verification::VerificationManager;
use crate::registry::{GroupId, UserId, FIRST_ALLOCATED_ID};
use crate::room::{GroupRoom, PrivateRoom};
use crate::transport::connection::{Connection, ConnectionId};

#[derive(Debug)]
struct ConnectionBinding {
    connection: Arc<Connection>,
    user: UserId,
}

/// Process-wide registry
#[derive(Debug)]
pub struct Manager {
    connections: RwLock<HashMap<ConnectionId, ConnectionBinding>>,
    users: RwLock<HashMap<UserId, Arc<User>>>,
    group_rooms: RwLock<HashMap<GroupId, Arc<GroupRoom>>>,
    private_rooms: RwLock<HashMap<GroupId, Arc<PrivateRoom>>>,
    /// `(a, b) → room id`, stored in creation order, queried both ways
    private_room_index: RwLock<HashMap<(UserId, UserId), GroupId>>,
    next_user_id: AtomicI64,
    next_private_room_id: AtomicI64,
    next_group_room_id: AtomicI64,
    verifications: VerificationManager,
}

impl Manager {
    /// Create an empty registry with fresh id allocators
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            group_rooms: RwLock::new(HashMap::new()),
            private_rooms: RwLock::new(HashMap::new()),
            private_room_index: RwLock::new(HashMap::new()),
            next_user_id: AtomicI64::new(FIRST_ALLOCATED_ID),
            next_private_room_id: AtomicI64::new(FIRST_ALLOCATED_ID),
            next_group_room_id: AtomicI64::new(FIRST_ALLOCATED_ID),
            verifications: VerificationManager::new(),
        }
    }

    /// The friend / group-join verification subsystem
    pub fn verifications(&self) -> &VerificationManager {
        &self.verifications
    }

    // =========================================================================
    // Private rooms
    // =========================================================================

    /// Create the private room for a user pair
    ///
    /// The caller is responsible for having checked that no room exists
    /// for the pair yet.
    pub fn add_private_room(&self, user_a: UserId, user_b: UserId) -> GroupId {
        let room_id = GroupId(self.next_private_room_id.fetch_add(1, Ordering::Relaxed));
        let room = Arc::new(PrivateRoom::new(user_a, user_b));

        let mut rooms = self.private_rooms.write().expect("manager lock poisoned");
        let mut index = self
            .private_room_index
            .write()
            .expect("manager lock poisoned");
        rooms.insert(room_id, room);
        index.insert((user_a, user_b), room_id);
        room_id
    }

    /// Whether a private room exists for the pair, in either order
    pub fn has_private_room(&self, user_a: UserId, user_b: UserId) -> bool {
        let index = self
            .private_room_index
            .read()
            .expect("manager lock poisoned");
        index.contains_key(&(user_a, user_b)) || index.contains_key(&(user_b, user_a))
    }

    /// Whether a private room exists under the given id
    pub fn has_private_room_by_id(&self, room_id: GroupId) -> bool {
        self.private_rooms
            .read()
            .expect("manager lock poisoned")
            .contains_key(&room_id)
    }

    /// Resolve a user pair to its room id, tolerating either order
    pub fn get_private_room_id(&self, user_a: UserId, user_b: UserId) -> Result<GroupId> {
        let index = self
            .private_room_index
            .read()
            .expect("manager lock poisoned");
        index
            .get(&(user_a, user_b))
            .or_else(|| index.get(&(user_b, user_a)))
            .copied()
            .ok_or(ChatError::PrivateRoomNotExisted)
    }

    pub fn get_private_room(&self, room_id: GroupId) -> Result<Arc<PrivateRoom>> {
        self.private_rooms
            .read()
            .expect("manager lock poisoned")
            .get(&room_id)
            .cloned()
            .ok_or(ChatError::PrivateRoomNotExisted)
    }

    /// Remove a private room and whichever pair-index orientation exists
    pub fn remove_private_room(&self, room_id: GroupId) -> Result<()> {
        let mut rooms = self.private_rooms.write().expect("manager lock poisoned");
        let mut index = self
            .private_room_index
            .write()
            .expect("manager lock poisoned");

        let room = rooms.get(&room_id).ok_or(ChatError::PrivateRoomNotExisted)?;
        // The pair is read straight off the room object so the index can
        // be cleared even after the room was flagged unusable.
        let (user_a, user_b) = match room.user_ids() {
            Ok(pair) => pair,
            Err(_) => {
                let found = index
                    .iter()
                    .find(|(_, id)| **id == room_id)
                    .map(|(pair, _)| *pair);
                found.ok_or(ChatError::PrivateRoomNotExisted)?
            }
        };

        if index.remove(&(user_a, user_b)).is_none() {
            index.remove(&(user_b, user_a));
        }
        rooms.remove(&room_id);
        Ok(())
    }

    // =========================================================================
    // Group rooms
    // =========================================================================

    /// Create a group room with the creator as its administrator
    pub fn add_group_room(&self, creator: UserId) -> GroupId {
        let room_id = GroupId(self.next_group_room_id.fetch_add(1, Ordering::Relaxed));
        let room = Arc::new(GroupRoom::new(room_id, creator));
        self.group_rooms
            .write()
            .expect("manager lock poisoned")
            .insert(room_id, room);
        room_id
    }

    pub fn has_group_room(&self, room_id: GroupId) -> bool {
        self.group_rooms
            .read()
            .expect("manager lock poisoned")
            .contains_key(&room_id)
    }

    pub fn get_group_room(&self, room_id: GroupId) -> Result<Arc<GroupRoom>> {
        self.group_rooms
            .read()
            .expect("manager lock poisoned")
            .get(&room_id)
            .cloned()
            .ok_or(ChatError::GroupRoomNotExisted)
    }

    pub fn remove_group_room(&self, room_id: GroupId) -> Result<()> {
        let mut rooms = self.group_rooms.write().expect("manager lock poisoned");
        if rooms.remove(&room_id).is_none() {
            return Err(ChatError::GroupRoomNotExisted);
        }
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Allocate a fresh user id and insert the new user
    pub fn add_new_user(&self) -> Arc<User> {
        let user_id = UserId(self.next_user_id.fetch_add(1, Ordering::Relaxed));
        let user = Arc::new(User::new(user_id));
        self.users
            .write()
            .expect("manager lock poisoned")
            .insert(user_id, Arc::clone(&user));
        user
    }

    pub fn has_user(&self, user_id: UserId) -> bool {
        self.users
            .read()
            .expect("manager lock poisoned")
            .contains_key(&user_id)
    }

    pub fn get_user(&self, user_id: UserId) -> Result<Arc<User>> {
        self.users
            .read()
            .expect("manager lock poisoned")
            .get(&user_id)
            .cloned()
            .ok_or(ChatError::UserNotExisted)
    }

    /// Snapshot of every registered user
    pub fn get_user_list(&self) -> Vec<Arc<User>> {
        self.users
            .read()
            .expect("manager lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Connection bindings
    // =========================================================================

    /// Install an unbound binding for a freshly accepted connection
    pub fn register_connection(&self, connection: &Arc<Connection>) -> Result<()> {
        let mut connections = self.connections.write().expect("manager lock poisoned");
        if connections.contains_key(&connection.id()) {
            return Err(ChatError::ConnectionAlreadyRegistered);
        }
        connections.insert(
            connection.id(),
            ConnectionBinding {
                connection: Arc::clone(connection),
                user: UserId::UNBOUND,
            },
        );
        Ok(())
    }

    pub fn has_connection(&self, connection_id: ConnectionId) -> bool {
        self.connections
            .read()
            .expect("manager lock poisoned")
            .contains_key(&connection_id)
    }

    /// Whether the connection is currently bound to the given user
    pub fn match_user_of_connection(&self, connection_id: ConnectionId, user_id: UserId) -> bool {
        self.connections
            .read()
            .expect("manager lock poisoned")
            .get(&connection_id)
            .map(|binding| binding.user == user_id)
            .unwrap_or(false)
    }

    /// The user a connection is bound to (`UNBOUND` before login)
    pub fn get_user_id_of_connection(&self, connection_id: ConnectionId) -> Result<UserId> {
        self.connections
            .read()
            .expect("manager lock poisoned")
            .get(&connection_id)
            .map(|binding| binding.user)
            .ok_or(ChatError::ConnectionNotRegistered)
    }

    /// Atomically rebind a connection to a user with the given device
    ///
    /// The connection is detached from any previously bound user first,
    /// so a connection appears in exactly one user's endpoint set.
    pub fn modify_user_of_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        device: DeviceKind,
    ) -> Result<()> {
        let mut connections = self.connections.write().expect("manager lock poisoned");
        let users = self.users.read().expect("manager lock poisoned");

        let user = users.get(&user_id).ok_or(ChatError::UserNotExisted)?;
        let binding = connections
            .get_mut(&connection_id)
            .ok_or(ChatError::ConnectionNotRegistered)?;

        if binding.user.is_bound() {
            if let Some(previous) = users.get(&binding.user) {
                previous.remove_connection(connection_id);
            }
        }
        user.add_connection(Arc::clone(&binding.connection), device);
        binding.user = user_id;
        Ok(())
    }

    /// Unbind and drop a connection; its user, if any, loses the endpoint
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Result<()> {
        let mut connections = self.connections.write().expect("manager lock poisoned");
        let users = self.users.read().expect("manager lock poisoned");

        let binding = connections
            .get(&connection_id)
            .ok_or(ChatError::ConnectionNotRegistered)?;
        if binding.user.is_bound() {
            if let Some(user) = users.get(&binding.user) {
                user.remove_connection(connection_id);
            }
        }
        connections.remove(&connection_id);
        Ok(())
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
