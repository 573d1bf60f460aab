//! Late-bound values that reference other resources in a stack plan

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Logical identifier of a resource inside a stack plan.
///
/// Identifiers are alphanumeric so they can be used directly as template
/// logical ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create an id, returning `None` if it is empty or not alphanumeric
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric())
            && id.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
        valid.then_some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference to an attribute of this resource
    pub fn attr(&self, attribute: impl Into<String>) -> AttrRef {
        AttrRef {
            resource: self.clone(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attribute exported by a resource once it has been provisioned
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttrRef {
    pub resource: ResourceId,
    pub attribute: String,
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// A value that is either known at composition time or resolved by the
/// provisioning engine.
///
/// In value position a token serializes to the matching template intrinsic.
/// Interpolated into a string (`Display`) it becomes a `${Id}` or
/// `${Id.Attribute}` substitution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Literal(String),
    Ref(ResourceId),
    Attr(AttrRef),
}

impl Token {
    pub fn literal(value: impl Into<String>) -> Self {
        Token::Literal(value.into())
    }

    /// The resource this token depends on, if any
    pub fn referenced(&self) -> Option<&ResourceId> {
        match self {
            Token::Literal(_) => None,
            Token::Ref(id) => Some(id),
            Token::Attr(attr) => Some(&attr.resource),
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Token::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Token::Literal(value) if value == "*")
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::Literal(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::Literal(value)
    }
}

impl From<AttrRef> for Token {
    fn from(value: AttrRef) -> Self {
        Token::Attr(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Literal(value) => f.write_str(value),
            Token::Ref(id) => write!(f, "${{{}}}", id),
            Token::Attr(attr) => attr.fmt(f),
        }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Token::Literal(value) => serializer.serialize_str(value),
            Token::Ref(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", id)?;
                map.end()
            }
            Token::Attr(attr) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &(&attr.resource, &attr.attribute))?;
                map.end()
            }
        }
    }
}

// Documents read from disk only ever carry literal values.
impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Token::Literal)
    }
}
