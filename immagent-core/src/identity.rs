//! Identity types for ImmAgent assets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Trait for type-safe asset IDs.
///
/// Each asset kind has its own strongly-typed ID so that a message id can
/// never be passed where an agent id is expected.
pub trait AssetIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the asset kind (e.g., "agent", "message").
    const ASSET_NAME: &'static str;

    /// Create an ID from an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh random ID.
    fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// The nil (all zeros) ID.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

/// Error type for parsing asset IDs from strings.
#[derive(Debug, Clone)]
pub struct AssetIdParseError {
    pub asset_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for AssetIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to parse {} ID from '{}': {}",
            self.asset_name, self.input, self.source
        )
    }
}

impl std::error::Error for AssetIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Define a type-safe asset ID newtype.
macro_rules! define_asset_id {
    ($name:ident, $asset:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl AssetIdType for $name {
            const ASSET_NAME: &'static str = $asset;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
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
            type Err = AssetIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| AssetIdParseError {
                        asset_name: Self::ASSET_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self::new(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.as_uuid()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_asset_id!(TextAssetId, "text_asset", "ID of a text asset (system prompt).");
define_asset_id!(MessageId, "message", "ID of a conversation message.");
define_asset_id!(ConversationId, "conversation", "ID of a conversation snapshot.");
define_asset_id!(AgentId, "agent", "ID of an agent version.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = AgentId::generate();
        let b = AgentId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn roundtrip_through_string() {
        let id = MessageId::generate();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<ConversationId>().unwrap_err();
        assert_eq!(err.asset_name, "conversation");
    }

    #[test]
    fn serde_is_transparent() {
        let id = TextAssetId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let back: TextAssetId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
