//! Authenticated principal and its attribute values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A single attribute value: one string or an ordered list of strings.
///
/// Serialized untagged so that `"a"` and `["a", "b"]` both round-trip
/// unchanged through JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Scalar(String),
    List(Vec<String>),
}

impl AttributeValue {
    /// All values in order.
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Scalar(v) => vec![v.clone()],
            Self::List(vs) => vs.clone(),
        }
    }

    /// First value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Scalar(v) => Some(v.as_str()),
            Self::List(vs) => vs.first().map(String::as_str),
        }
    }

    /// The scalar value, if this is a scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(v) => Some(v.as_str()),
            Self::List(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

/// A short duration written the way directory entries write it
/// (`90s`, `1m`, `3m`, `2h`, `1d`).
///
/// The original text is kept so that releasing it as an attribute gives
/// back exactly what the directory contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpan {
    raw: String,
    duration: Duration,
}

impl TimeSpan {
    /// Parse a `<number><unit>` string. A bare number is seconds.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the text is not a duration.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let amount: u64 = number
            .parse()
            .map_err(|_| format!("'{raw}' is not a duration (expected e.g. 1m, 90s, 2h)"))?;

        let multiplier = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            other => return Err(format!("'{raw}' has unknown duration unit '{other}'")),
        };

        Ok(Self {
            raw: trimmed.to_string(),
            duration: Duration::from_secs(amount.saturating_mul(multiplier)),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// An authenticated user as seen by assertion issuance.
///
/// The full attribute set is carried here. Which attributes a relying
/// party actually receives is decided at release time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable unique identifier (`uid` in the directory).
    pub unique_id: String,
    /// Display name (`cn` in the directory), falling back to the username.
    pub display_name: String,
    /// Attribute name to value, ordered by name.
    pub attributes: BTreeMap<String, AttributeValue>,
    pub expiration: Option<TimeSpan>,
    pub refresh: Option<TimeSpan>,
    pub role: Option<String>,
    pub company: Option<String>,
}

impl Principal {
    /// Create a principal with no optional fields set.
    pub fn new(unique_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            display_name: display_name.into(),
            attributes: BTreeMap::new(),
            expiration: None,
            refresh: None,
            role: None,
            company: None,
        }
    }

    /// Builder-style attribute insertion.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}
