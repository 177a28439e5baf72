//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
///
/// Every kind carries a stable numeric code (see [`ChatError::code`]);
/// the codes are part of the observable protocol surface and must not be
/// renumbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// A frame declares more bytes than are buffered
    IncompletePackage,
    /// A frame declares a length of zero
    EmptyLength,
    /// Malformed frame fields (unknown type byte, garbage header)
    InvalidData(String),
    /// A frame shorter than the fixed header plus checksum
    DataTooSmall,
    /// A frame larger than the allowed maximum
    DataTooLarge,
    /// Frame checksum does not match the payload
    HashMismatched,
    /// The server was started without a usable TLS configuration
    MissingTlsConfig,
    /// The connectivity probe was not the expected `"test"` text frame
    ConnectionTestFailed,
    /// A connection was registered with the manager twice
    ConnectionAlreadyRegistered,
    /// An operation referenced a connection unknown to the manager
    ConnectionNotRegistered,
    /// A user's password may only be set once
    PasswordAlreadySet,
    /// Password verification failed
    PasswordMismatched,
    /// An operation referenced a user id not present in the registry
    UserNotExisted,
    /// No private room exists for the given id or user pair
    PrivateRoomNotExisted,
    /// The private room was removed and can no longer be used
    PrivateRoomUnableToUse,
    /// A private room already exists between the two users
    PrivateRoomExisted,
    /// No group room exists for the given id
    GroupRoomNotExisted,
    /// The group room was removed and can no longer be used
    GroupRoomUnableToUse,
    /// A verification request that is malformed (e.g. self-directed)
    InvalidVerification,
    /// A verification record already exists for the pair
    VerificationExisted,
    /// No verification record exists for the pair
    VerificationNotExisted,
    /// The caller lacks the permission for the operation
    NoPermission,
    /// Network-level errors (socket I/O, TLS)
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// A supervised request ran past its deadline
    TimedOut,
}

impl ChatError {
    /// Get the stable numeric code for this error kind
    ///
    /// Codes 8 and 9 of the historical taxonomy named null-handle states
    /// that cannot be represented here and remain reserved.
    pub fn code(&self) -> u32 {
        match self {
            ChatError::IncompletePackage => 1,
            ChatError::EmptyLength => 2,
            ChatError::InvalidData(_) => 3,
            ChatError::DataTooSmall => 4,
            ChatError::DataTooLarge => 5,
            ChatError::HashMismatched => 6,
            ChatError::MissingTlsConfig => 7,
            ChatError::ConnectionTestFailed => 10,
            ChatError::ConnectionAlreadyRegistered => 11,
            ChatError::ConnectionNotRegistered => 12,
            ChatError::PasswordAlreadySet => 13,
            ChatError::PasswordMismatched => 14,
            ChatError::UserNotExisted => 15,
            ChatError::PrivateRoomNotExisted => 16,
            ChatError::PrivateRoomUnableToUse => 17,
            ChatError::PrivateRoomExisted => 18,
            ChatError::GroupRoomNotExisted => 19,
            ChatError::GroupRoomUnableToUse => 20,
            ChatError::InvalidVerification => 21,
            ChatError::VerificationExisted => 22,
            ChatError::VerificationNotExisted => 23,
            ChatError::NoPermission => 24,
            ChatError::Network(_) => 1000,
            ChatError::Serialization(_) => 1001,
            ChatError::TimedOut => 1002,
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create an invalid-data error
    pub fn invalid_data<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidData(msg.into())
    }

    /// True for the framing kinds that are fatal to a connection
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ChatError::IncompletePackage
                | ChatError::EmptyLength
                | ChatError::InvalidData(_)
                | ChatError::DataTooSmall
                | ChatError::DataTooLarge
                | ChatError::HashMismatched
        )
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::IncompletePackage => write!(f, "incomplete package"),
            ChatError::EmptyLength => write!(f, "package declares an empty length"),
            ChatError::InvalidData(msg) => write!(f, "invalid package data: {}", msg),
            ChatError::DataTooSmall => write!(f, "package smaller than the minimum size"),
            ChatError::DataTooLarge => write!(f, "package larger than the maximum size"),
            ChatError::HashMismatched => write!(f, "package hash mismatched"),
            ChatError::MissingTlsConfig => write!(f, "no TLS configuration available"),
            ChatError::ConnectionTestFailed => write!(f, "connection test failed"),
            ChatError::ConnectionAlreadyRegistered => {
                write!(f, "connection already registered")
            }
            ChatError::ConnectionNotRegistered => write!(f, "connection not registered"),
            ChatError::PasswordAlreadySet => write!(f, "password has already been set"),
            ChatError::PasswordMismatched => write!(f, "password mismatched"),
            ChatError::UserNotExisted => write!(f, "user does not exist"),
            ChatError::PrivateRoomNotExisted => write!(f, "private room does not exist"),
            ChatError::PrivateRoomUnableToUse => {
                write!(f, "private room can no longer be used")
            }
            ChatError::PrivateRoomExisted => write!(f, "private room already exists"),
            ChatError::GroupRoomNotExisted => write!(f, "group room does not exist"),
            ChatError::GroupRoomUnableToUse => write!(f, "group room can no longer be used"),
            ChatError::InvalidVerification => write!(f, "invalid verification request"),
            ChatError::VerificationExisted => write!(f, "verification already exists"),
            ChatError::VerificationNotExisted => write!(f, "verification does not exist"),
            ChatError::NoPermission => write!(f, "no permission"),
            ChatError::Network(msg) => write!(f, "network error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            ChatError::TimedOut => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}
