//! Provenance markers
//!
//! Every element touched by weaving records which aspect touched it, from
//! which repository and when. The marker also keeps an aspect from being
//! applied twice to the same element across runs.

use chrono::{SecondsFormat, Utc};
use weft_metadata::CustomAttribute;

use crate::wellknown::{is_woven_by, woven_by};

/// Marker factory for one weaving run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Aspect repository name
    pub repository: String,
    /// RFC 3339 UTC timestamp of the run
    pub timestamp: String,
}

impl Provenance {
    /// Markers stamped with the current time
    pub fn now(repository: impl Into<String>) -> Self {
        Self::at(
            repository,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Markers stamped with a fixed time
    pub fn at(repository: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Marker for `advice`
    pub fn marker(&self, advice: &str) -> CustomAttribute {
        woven_by(advice, &self.repository, &self.timestamp)
    }

    /// Add a marker for `advice` unless one is present; returns whether it
    /// was added
    pub fn tag(&self, attributes: &mut Vec<CustomAttribute>, advice: &str) -> bool {
        if is_woven_by(attributes, advice) {
            return false;
        }
        attributes.push(self.marker(advice));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_once() {
        let provenance = Provenance::at("audit", "2024-01-01T00:00:00Z");
        let mut attrs = Vec::new();
        assert!(provenance.tag(&mut attrs, "Logging"));
        assert!(!provenance.tag(&mut attrs, "Logging"));
        assert!(provenance.tag(&mut attrs, "Tracing"));
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].string_arg(1), Some("audit"));
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let provenance = Provenance::now("audit");
        assert!(provenance.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&provenance.timestamp).is_ok());
    }
}
