// File: src/chat/core/ids.rs

//! Identifier types for the chat store.
//!
//! Owners come from an external identity provider and are opaque strings;
//! messages are identified by UUIDs assigned by the store. The single
//! welcome record of an owner gets a deterministic id so that it can be
//! written with an insert-if-absent primitive.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for owner-derived welcome ids (UUIDv5).
const WELCOME_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1f, 0x3a, 0x52, 0x9d, 0x04, 0x4c, 0x8e, 0xa1, 0x77, 0x2e, 0x5d, 0xc0, 0x19, 0x84, 0xf3,
]);

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new random identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of a stored chat message.
    ///
    /// Assigned by the store on creation and stable for the message's lifetime.
    MessageId
);

impl MessageId {
    /// Deterministic id of the welcome record for `owner`.
    #[must_use]
    pub fn welcome_for(owner: &OwnerId) -> Self {
        Self(Uuid::new_v5(&WELCOME_NAMESPACE, owner.as_str().as_bytes()))
    }
}

/// Errors returned when parsing/validating an [`OwnerId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerIdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
    /// Contains a disallowed character.
    InvalidChar {
        /// The invalid character.
        ch: char,
        /// The index where it was found.
        index: usize,
    },
}

impl fmt::Display for OwnerIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "owner id must not be empty"),
            Self::TooLong { max, got } => write!(f, "owner id too long: got {got}, max {max}"),
            Self::InvalidChar { ch, index } => {
                write!(f, "owner id contains invalid character {ch:?} at index {index}")
            }
        }
    }
}

impl std::error::Error for OwnerIdError {}

/// Identity of the authenticated user that owns a message stream.
///
/// Every read and write is partitioned by this value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Hard ceiling to prevent pathological payloads.
    pub const MAX_LEN: usize = 128;

    /// Build a validated `OwnerId`.
    ///
    /// Rules:
    /// - Non-empty after trimming.
    /// - Max length limited.
    /// - Conservative ASCII set: `[A-Za-z0-9._:@|-]`.
    ///
    /// # Errors
    /// Returns `OwnerIdError` if the input is empty, too long, or contains invalid characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, OwnerIdError> {
        let s = raw.as_ref().trim();

        if s.is_empty() {
            return Err(OwnerIdError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(OwnerIdError::TooLong {
                max: Self::MAX_LEN,
                got: s.len(),
            });
        }

        for (i, ch) in s.chars().enumerate() {
            let ok = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | ':' | '@' | '|' | '-');
            if !ok {
                return Err(OwnerIdError::InvalidChar { ch, index: i });
            }
        }

        Ok(Self(s.to_owned()))
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerId {
    type Err = OwnerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = OwnerIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
