//! Version identifiers and promotion states

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Monotonic per-model version, displayed as `v1`, `v2`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId(u32);

impl VersionId {
    /// First version assigned to a model
    pub const FIRST: VersionId = VersionId(1);

    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = String;

    /// Accepts `v3` or `3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(format!("invalid version id '{s}'")),
        }
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Lifecycle state of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionState {
    Staging,
    Production,
    Archived,
}

impl PromotionState {
    /// Whether a version may move from `self` to `target`.
    ///
    /// Production is only left by being replaced: installing a new production
    /// version archives the previous one as part of the same promotion.
    pub fn can_transition_to(&self, target: PromotionState) -> bool {
        use PromotionState::*;
        matches!(
            (self, target),
            (Staging, Production)
                | (Staging, Archived)
                | (Archived, Staging)
                | (Archived, Production)
        )
    }
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PromotionState::Staging => "staging",
            PromotionState::Production => "production",
            PromotionState::Archived => "archived",
        };
        f.write_str(s)
    }
}

impl FromStr for PromotionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Ok(PromotionState::Staging),
            "production" | "prod" => Ok(PromotionState::Production),
            "archived" => Ok(PromotionState::Archived),
            other => Err(format!("unknown promotion state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing_and_display() {
        assert_eq!("v3".parse::<VersionId>().unwrap(), VersionId::new(3));
        assert_eq!("7".parse::<VersionId>().unwrap().to_string(), "v7");
        assert!("v0".parse::<VersionId>().is_err());
        assert!("latest".parse::<VersionId>().is_err());
        assert_eq!(VersionId::FIRST.next(), VersionId::new(2));
    }

    #[test]
    fn test_version_serializes_as_string() {
        let json = serde_json::to_string(&VersionId::new(2)).unwrap();
        assert_eq!(json, "\"v2\"");
    }

    #[test]
    fn test_transitions() {
        use PromotionState::*;
        assert!(Staging.can_transition_to(Production));
        assert!(Staging.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Production));
        assert!(!Production.can_transition_to(Staging));
        assert!(!Production.can_transition_to(Archived));
        assert!(!Staging.can_transition_to(Staging));
    }
}
