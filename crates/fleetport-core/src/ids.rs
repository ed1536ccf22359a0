//! Core identifier types for fleetport.
//!
//! All records are keyed by monotonically assigned 64-bit integers. Each kind of
//! record gets its own newtype so an `AllocationId` can never be passed where a
//! `TaskId` is expected. IDs serialize as plain JSON numbers and encode as
//! big-endian bytes for ordered storage keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string is not a valid unsigned integer.
    #[error("invalid numeric id: {0}")]
    InvalidNumber(String),

    /// Byte slice has the wrong length for a key-encoded id.
    #[error("invalid id length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Create an ID from its raw value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the raw value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Encode as big-endian bytes so lexicographic key order matches numeric order.
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decode from the big-endian representation produced by [`Self::to_be_bytes`].
            ///
            /// # Errors
            ///
            /// Returns an error if the slice is not exactly 8 bytes.
            pub fn from_be_slice(bytes: &[u8]) -> Result<Self, IdError> {
                let arr: [u8; 8] = bytes.try_into().map_err(|_| IdError::InvalidLength {
                    expected: 8,
                    got: bytes.len(),
                })?;
                Ok(Self(u64::from_be_bytes(arr)))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>()
                    .map(Self)
                    .map_err(|_| IdError::InvalidNumber(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a registered agent (compute node).
    AgentId
);

numeric_id!(
    /// Identifier of a port allocation.
    AllocationId
);

numeric_id!(
    /// Identifier of a dispatched task.
    TaskId
);

numeric_id!(
    /// Identifier of an operator account.
    ///
    /// The value `0` is reserved for the system actor.
    UserId
);

numeric_id!(
    /// Identifier of an audit log entry.
    AuditId
);

impl UserId {
    /// The pseudo-user recorded for actions taken by the system itself.
    pub const SYSTEM: Self = Self(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let id: AgentId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{id:?}"), "AgentId(42)");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("abc".parse::<TaskId>().is_err());
        assert!("-1".parse::<TaskId>().is_err());
        assert!("".parse::<TaskId>().is_err());
    }

    #[test]
    fn big_endian_bytes_preserve_order() {
        let small = AllocationId::new(255);
        let large = AllocationId::new(256);
        assert!(small.to_be_bytes() < large.to_be_bytes());

        let decoded = AllocationId::from_be_slice(&large.to_be_bytes()).unwrap();
        assert_eq!(decoded, large);
    }

    #[test]
    fn from_be_slice_checks_length() {
        let err = TaskId::from_be_slice(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, IdError::InvalidLength { expected: 8, got: 3 });
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&AgentId::new(9)).unwrap();
        assert_eq!(json, "9");

        let id: AgentId = serde_json::from_str("9").unwrap();
        assert_eq!(id, AgentId::new(9));
    }
}
