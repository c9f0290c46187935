//! Group references returned by the identity provider.
//!
//! Providers disagree on how they express group membership: some return
//! plain names, others `{name, id}` objects, and ids are not always UUIDs.
//! Everything decodes into [`GroupRef`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Namespace for group ids derived from names.
pub const GROUP_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b0e_4a7d_5c38_9e21_d4b3_8a5f_0c17);

/// A group membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawGroup", into = "RawGroup")]
pub enum GroupRef {
    /// Group known only by name.
    Named(String),
    /// Group with a provider-assigned id.
    NamedWithId(String, Uuid),
}

impl GroupRef {
    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) | Self::NamedWithId(name, _) => name,
        }
    }

    /// Provider id, or a stable UUIDv5 derived from the name.
    #[must_use]
    pub fn effective_id(&self) -> Uuid {
        match self {
            Self::NamedWithId(_, id) => *id,
            Self::Named(name) => Uuid::new_v5(&GROUP_NAMESPACE, name.as_bytes()),
        }
    }
}

/// Wire shapes accepted for a group entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawGroup {
    Plain(String),
    Object {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
}

impl From<RawGroup> for GroupRef {
    fn from(raw: RawGroup) -> Self {
        match raw {
            RawGroup::Plain(name) => Self::Named(name),
            RawGroup::Object { name, id } => {
                let parsed = id
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok());
                match parsed {
                    Some(id) => Self::NamedWithId(name, id),
                    None => Self::Named(name),
                }
            }
        }
    }
}

impl From<GroupRef> for RawGroup {
    fn from(group: GroupRef) -> Self {
        match group {
            GroupRef::Named(name) => RawGroup::Plain(name),
            GroupRef::NamedWithId(name, id) => RawGroup::Object {
                name,
                id: Some(Value::String(id.to_string())),
            },
        }
    }
}
