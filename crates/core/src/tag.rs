//! Event tags: `"<dimension>:<value>"` labels used for indexed retrieval.
//!
//! Tags are opaque to consumers once built. The separator and dimension names
//! are part of the persisted contract: historical events are only found again
//! if the exact same string is produced.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Separator between dimension and value.
pub const TAG_SEPARATOR: char = ':';

/// An opaque tag attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// Build a tag from a dimension name and a value.
    ///
    /// The dimension must be non-empty and must not contain the separator.
    /// Values are taken verbatim.
    pub fn new(dimension: &str, value: impl fmt::Display) -> Self {
        debug_assert!(!dimension.is_empty() && !dimension.contains(TAG_SEPARATOR));
        Self(format!("{dimension}{TAG_SEPARATOR}{value}"))
    }

    /// Parse a raw tag string, validating the `<dimension>:<value>` shape.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw.split_once(TAG_SEPARATOR) {
            Some((dimension, value)) if !dimension.is_empty() && !value.is_empty() => {
                Ok(Self(raw.to_string()))
            }
            _ => Err(DomainError::invalid_id(format!(
                "tag must look like <dimension>{TAG_SEPARATOR}<value>, got '{raw}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn dimension(&self) -> &str {
        self.0
            .split_once(TAG_SEPARATOR)
            .map(|(d, _)| d)
            .unwrap_or(&self.0)
    }

    pub fn value(&self) -> &str {
        self.0
            .split_once(TAG_SEPARATOR)
            .map(|(_, v)| v)
            .unwrap_or("")
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_dimension_colon_value() {
        let tag = Tag::new("cart_id", "abc");
        assert_eq!(tag.as_str(), "cart_id:abc");
        assert_eq!(tag.dimension(), "cart_id");
        assert_eq!(tag.value(), "abc");
    }

    #[test]
    fn value_may_contain_separator() {
        let tag = Tag::parse("sku:a:b").unwrap();
        assert_eq!(tag.dimension(), "sku");
        assert_eq!(tag.value(), "a:b");
    }

    #[test]
    fn malformed_tags_are_rejected() {
        assert!(Tag::parse("no-separator").is_err());
        assert!(Tag::parse(":value").is_err());
        assert!(Tag::parse("dimension:").is_err());
    }

    #[test]
    fn serde_uses_the_plain_string() {
        let tag = Tag::new("product_id", 7);
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"product_id:7\"");
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
        assert!(serde_json::from_str::<Tag>("\"broken\"").is_err());
    }
}
