//! Real-time message payloads: full entities and partial-update directives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{SyncError, SyncResult};
use crate::models::{Criteria, Entity};

const VERSION_KEY: &str = "$version";

/// Lower bound a directive expects the cached copy to be at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionBound {
    /// `"*"`: applies on top of any version.
    Any,
    Exact(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectiveVersion {
    pub before: VersionBound,
    pub after: u64,
}

impl DirectiveVersion {
    fn parse(value: &Value) -> SyncResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::Protocol(format!("$version is not an object: {value}")))?;
        let before = match obj.get("before") {
            Some(Value::String(s)) if s == "*" => VersionBound::Any,
            Some(v) => VersionBound::Exact(v.as_u64().ok_or_else(|| {
                SyncError::Protocol(format!("$version.before is not a version: {v}"))
            })?),
            None => return Err(SyncError::Protocol("$version.before is missing".into())),
        };
        let after = obj
            .get("after")
            .and_then(Value::as_u64)
            .ok_or_else(|| SyncError::Protocol("$version.after is missing".into()))?;
        Ok(Self { before, after })
    }
}

/// A partial update: field operators plus a before/after version pair.
/// Never carries a full entity body.
#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub id: String,
    /// `None` when the server omitted `$version`; resolving such a directive
    /// against a cached entity is a protocol violation.
    pub version: Option<DirectiveVersion>,
    /// Operator name (`$set`, `$unset`, ...) to operand.
    pub operations: Map<String, Value>,
}

impl Directive {
    pub fn parse(value: &Value) -> SyncResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::Protocol(format!("directive is not an object: {value}")))?;
        let id = obj
            .get("id")
            .or_else(|| obj.get("_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Protocol(format!("directive without id: {value}")))?
            .to_string();
        let version = obj.get(VERSION_KEY).map(DirectiveVersion::parse).transpose()?;
        let operations = obj
            .iter()
            .filter(|(key, _)| key.starts_with('$') && key.as_str() != VERSION_KEY)
            .map(|(key, operand)| (key.clone(), operand.clone()))
            .collect();
        Ok(Self {
            id,
            version,
            operations,
        })
    }

    pub fn criteria(&self) -> Criteria {
        Criteria::id(self.id.clone())
    }
}

/// Whether a raw element is a directive rather than a full entity.
pub fn is_directive(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.keys().any(|key| key.starts_with('$')))
}

/// One element of a real-time batch.
#[derive(Clone, Debug)]
pub enum Incoming<T> {
    Entity(T),
    Directive(Directive),
}

impl<T: Entity> Incoming<T> {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        if is_directive(value) {
            Ok(Incoming::Directive(Directive::parse(value)?))
        } else {
            Ok(Incoming::Entity(serde_json::from_value(value.clone())?))
        }
    }

    pub fn criteria(&self) -> Criteria {
        match self {
            Incoming::Entity(entity) => entity.fetch_criteria(),
            Incoming::Directive(directive) => directive.criteria(),
        }
    }

    pub fn is_directive(&self) -> bool {
        matches!(self, Incoming::Directive(_))
    }
}

/// A real-time message as delivered by the broadcaster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RawMessage {
    pub fn new(message_type: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            message_type: message_type.into(),
            data: Some(Value::Array(data)),
        }
    }

    /// The message's elements; fails when `data` is absent or not an array.
    pub fn elements(&self) -> SyncResult<&[Value]> {
        match &self.data {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(SyncError::Protocol(format!(
                "{} message was either missing data or it wasn't an array",
                self.message_type
            ))),
        }
    }
}
