//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a single event occurrence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

/// Groups all events emitted by one logical business operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(EventId, "EventId");
impl_uuid_newtype!(CorrelationId, "CorrelationId");

/// Identifier of an aggregate (the entity a stream of events belongs to).
///
/// Aggregate ids are business identifiers, not UUIDs: an asset register key
/// like `"AST-001"` or a settlement reference like `"TXN-2024-0007"`. The
/// newtype keeps them from being confused with other strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<AggregateId> for String {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn event_id_roundtrips_through_display_and_parse() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn event_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<EventId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn aggregate_id_preserves_business_identifier() {
        let id = AggregateId::from("AST-001");
        assert_eq!(id.as_str(), "AST-001");
        assert_eq!(id.to_string(), "AST-001");
    }

    #[test]
    fn aggregate_ids_compare_by_value() {
        assert_eq!(AggregateId::from("AST-001"), AggregateId::new("AST-001"));
        assert_ne!(AggregateId::from("AST-001"), AggregateId::from("AST-002"));
    }
}
