use std::fmt;
use std::sync::LazyLock;

use modmigrate_common::{Error, Result};
use regex::Regex;

/// Name of the migration every module starts from.
pub const BASE_MARKER: &str = "_base";

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^m(\d{6}_\d{6})_.+$").expect("version regex"));

static TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^m?(\d{6}_\d{6})(_.*?)?$").expect("target regex"));

/// A migration version name: `m<YYMMDD>_<HHMMSS>_<label>`.
///
/// Fixed-width timestamps make lexicographic order chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(String);

impl Version {
    pub fn parse(name: &str) -> Option<Self> {
        VERSION_RE.is_match(name).then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The `YYMMDD_HHMMSS` part.
    pub fn timestamp(&self) -> &str {
        &self.0[1..14]
    }

    pub fn is_base(&self) -> bool {
        is_base_name(&self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timestamp part of a version string, if it is well formed.
pub fn timestamp_of(version: &str) -> Option<&str> {
    VERSION_RE
        .captures(version)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn is_base_name(name: &str) -> bool {
    name.contains(BASE_MARKER)
}

/// A user-supplied version for `to` and `mark`: either a bare timestamp
/// (`101129_185401`) or a full migration name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTarget {
    prefix: String,
    original: String,
}

impl VersionTarget {
    pub fn parse(input: &str) -> Result<Self> {
        let caps = TARGET_RE.captures(input).ok_or_else(|| {
            Error::Usage(
                "the version must be either a timestamp (e.g. 101129_185401) \
                 or the full name of a migration (e.g. m101129_185401_create_user_table)"
                    .to_string(),
            )
        })?;
        Ok(Self {
            prefix: format!("m{}_", &caps[1]),
            original: input.to_string(),
        })
    }

    /// The input as the user typed it.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn matches(&self, version: &str) -> bool {
        version.starts_with(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_versions() {
        let v = Version::parse("m240101_100000_init").unwrap();
        assert_eq!(v.timestamp(), "240101_100000");
        assert_eq!(v.as_str(), "m240101_100000_init");
        assert!(!v.is_base());

        assert!(Version::parse("m000000_000000_blog_base").unwrap().is_base());
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(Version::parse("240101_100000_init").is_none());
        assert!(Version::parse("m2401_100000_init").is_none());
        assert!(Version::parse("m240101_100000_").is_none());
        assert!(Version::parse("m240101_100000").is_none());
    }

    #[test]
    fn string_order_is_chronological() {
        let mut versions = vec![
            Version::parse("m240102_000000_b").unwrap(),
            Version::parse("m231231_235959_z").unwrap(),
            Version::parse("m240101_000000_a").unwrap(),
        ];
        versions.sort();
        let names: Vec<_> = versions.iter().map(Version::as_str).collect();
        assert_eq!(
            names,
            vec!["m231231_235959_z", "m240101_000000_a", "m240102_000000_b"]
        );
    }

    #[test]
    fn timestamp_of_handles_ledger_strings() {
        assert_eq!(timestamp_of("m240101_100000_init"), Some("240101_100000"));
        assert_eq!(timestamp_of("garbage"), None);
    }

    #[test]
    fn target_accepts_timestamp_prefixed_or_full_name() {
        for input in [
            "240101_100000",
            "m240101_100000",
            "m240101_100000_init",
        ] {
            let target = VersionTarget::parse(input).unwrap();
            assert!(target.matches("m240101_100000_init"), "{input}");
            assert!(!target.matches("m240101_100001_other"), "{input}");
            assert_eq!(target.original(), input);
        }
    }

    #[test]
    fn target_rejects_other_input() {
        let err = VersionTarget::parse("latest").unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(VersionTarget::parse("2401_1000").is_err());
    }
}
