//! Kafka protocol version resolution.
//!
//! Versions before 1.0 carry four components (`0.10.2.0`), later ones carry
//! three (`2.2.0`). The resolved version is handed to librdkafka as
//! `broker.version.fallback`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KafkaVersion([u32; 4]);

impl KafkaVersion {
    /// Version used when the configuration does not name one.
    pub const DEFAULT: KafkaVersion = KafkaVersion([2, 2, 0, 0]);

    /// Oldest version the bus can talk to (consumer groups with offset commits).
    pub const MINIMUM: KafkaVersion = KafkaVersion([0, 10, 2, 0]);

    /// Resolve an optional configured version, applying the default and the
    /// minimum version check.
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        let version = match configured.map(str::trim) {
            None | Some("") => Self::DEFAULT,
            Some(s) => s.parse()?,
        };
        if !version.is_at_least(Self::MINIMUM) {
            return Err(Error::UnsupportedVersion {
                version: version.to_string(),
                minimum: Self::MINIMUM.to_string(),
            });
        }
        Ok(version)
    }

    pub fn is_at_least(&self, other: KafkaVersion) -> bool {
        *self >= other
    }
}

impl FromStr for KafkaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let parts = s
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                p.parse::<u32>().map_err(|_| invalid())
            })
            .collect::<Result<Vec<_>>>()?;

        match parts.as_slice() {
            [0, a, b, c] => Ok(KafkaVersion([0, *a, *b, *c])),
            [major, minor, patch] if *major > 0 => Ok(KafkaVersion([*major, *minor, *patch, 0])),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for KafkaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        if a == 0 {
            write!(f, "0.{b}.{c}.{d}")
        } else {
            write!(f, "{a}.{b}.{c}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        assert_eq!("0.10.2.0".parse::<KafkaVersion>().unwrap(), KafkaVersion::MINIMUM);
        assert_eq!("2.2.0".parse::<KafkaVersion>().unwrap(), KafkaVersion::DEFAULT);
        assert_eq!(
            "3.7.1".parse::<KafkaVersion>().unwrap().to_string(),
            "3.7.1"
        );
        assert_eq!(
            "0.11.0.2".parse::<KafkaVersion>().unwrap().to_string(),
            "0.11.0.2"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for s in ["", "2", "2.2", "2.2.0.0", "0.10.2", "v2.2.0", "2.x.0", "2..0", "2.2.-1"] {
            assert!(
                matches!(s.parse::<KafkaVersion>(), Err(Error::InvalidVersion(_))),
                "{s} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_default() {
        assert_eq!(KafkaVersion::resolve(None).unwrap(), KafkaVersion::DEFAULT);
        assert_eq!(KafkaVersion::resolve(Some("")).unwrap(), KafkaVersion::DEFAULT);
    }

    #[test]
    fn test_resolve_minimum() {
        assert!(KafkaVersion::resolve(Some("0.10.2.0")).is_ok());
        assert!(KafkaVersion::resolve(Some("1.0.0")).is_ok());

        let err = KafkaVersion::resolve(Some("0.10.1.0")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { .. }));
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "Kafka version 0.10.1.0 is not supported, at least 0.10.2.0 is required"
        );
    }

    #[test]
    fn test_ordering_across_formats() {
        let old: KafkaVersion = "0.11.0.0".parse().unwrap();
        let new: KafkaVersion = "1.0.0".parse().unwrap();
        assert!(new.is_at_least(old));
        assert!(!old.is_at_least(new));
    }
}
