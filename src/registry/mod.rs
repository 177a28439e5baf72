//! Domain registries: users, rooms, connection bindings
//!
//! This module provides:
//! - Opaque user and group identifiers with their unbound sentinel
//! - The user objects with credentials, endpoints and pending lists
//! - The central manager owning every registry map
//! - The verification manager for friend and group-join requests

pub mod manager;
pub mod user;
pub mod verification;

use std::fmt;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use manager::Manager;
pub use user::{DeviceKind, User, VerificationDirection};
pub use verification::VerificationManager;

/// Opaque user identifier; `-1` denotes "not logged in"
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// The sentinel carried by connections that have not logged in
    pub const UNBOUND: UserId = UserId(-1);

    /// True once the id refers to an actual user
    pub fn is_bound(self) -> bool {
        self != Self::UNBOUND
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque group (and private-room) identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First id handed out by each of the manager's allocators
pub const FIRST_ALLOCATED_ID: i64 = 10000;
