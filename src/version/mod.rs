// src/version/mod.rs

//! Version selectors and ordering for package relations
//!
//! A version is parsed into a numeric dotted prefix, an optional suffix
//! (`_alpha`, `_beta`, `_pre`, `_rc`, `_pN`, `-rN`, ...) and optional `+build`
//! metadata. A selector adds a condition in front of it:
//!
//! | Selector  | Admits                                             |
//! |-----------|----------------------------------------------------|
//! | (empty)   | any version                                        |
//! | `=1.0`    | exactly 1.0 (build metadata ignored)               |
//! | `!1.0`    | anything but 1.0                                   |
//! | `>=1.0`   | 1.0 and newer (`>`, `<`, `<=` likewise)            |
//! | `~1.0`    | any revision/suffix of 1.0                         |
//! | `=1.0*`   | `1.0 <= v < 1.1`                                   |
//!
//! Whole version strings without structure are ordered with a two-tier
//! strategy: SemVer after replacing `_` with `-`, falling back to Debian
//! ordering when SemVer does not apply.

pub mod debian;

use crate::error::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(?:\.[0-9]+)*)([a-z]?)(.*)$").expect("version regex is valid")
});

static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^_(alpha|beta|pre|rc|p)([0-9]*)").expect("suffix regex is valid")
});

static REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-r([0-9]+)$").expect("revision regex is valid"));

/// Condition carried by a version selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOp {
    /// No condition: admits anything
    Any,
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
    /// `!`
    Not,
    /// `~`: same numeric version, any suffix or revision
    AnyRevision,
    /// `=...*`: prefix match up to the next segment
    Prefix,
}

impl VersionOp {
    fn prefix(&self) -> &'static str {
        match self {
            VersionOp::Any => "",
            VersionOp::Less => "<",
            VersionOp::LessOrEqual => "<=",
            VersionOp::Equal | VersionOp::Prefix => "=",
            VersionOp::GreaterOrEqual => ">=",
            VersionOp::Greater => ">",
            VersionOp::Not => "!",
            VersionOp::AnyRevision => "~",
        }
    }
}

/// A parsed version selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSelector {
    pub op: VersionOp,
    /// Numeric dotted prefix, including an optional trailing letter
    pub version: String,
    /// Everything between the numeric prefix and `+build`
    pub suffix: String,
    /// Build metadata after `+`, preserved verbatim
    pub build: String,
}

impl VersionSelector {
    /// Parse a selector such as `>=1.0`, `~2.3-r1`, `=1.2*` or a bare version
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();

        if text.is_empty() || text == "*" {
            return Ok(Self::any());
        }

        let (op, rest) = if let Some(rest) = text.strip_prefix(">=") {
            (VersionOp::GreaterOrEqual, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (VersionOp::LessOrEqual, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (VersionOp::Greater, rest)
        } else if let Some(rest) = text.strip_prefix('<') {
            (VersionOp::Less, rest)
        } else if let Some(rest) = text.strip_prefix('=') {
            (VersionOp::Equal, rest)
        } else if let Some(rest) = text.strip_prefix('!') {
            (VersionOp::Not, rest)
        } else if let Some(rest) = text.strip_prefix('~') {
            (VersionOp::AnyRevision, rest)
        } else {
            (VersionOp::Equal, text)
        };

        let (op, rest) = match rest.strip_suffix('*') {
            Some(stripped) if op == VersionOp::Equal && !text.starts_with(|c: char| c.is_ascii_digit()) => {
                (VersionOp::Prefix, stripped)
            }
            Some(_) => {
                return Err(Error::InvalidVersion(format!(
                    "{} (wildcard is only allowed with '=')",
                    text
                )));
            }
            None => (op, rest),
        };

        // A bare operator constrains nothing
        if rest.trim().is_empty() {
            return Ok(Self::any());
        }

        let (rest, build) = match rest.split_once('+') {
            Some((v, b)) => (v, b.to_string()),
            None => (rest, String::new()),
        };

        let caps = VERSION_RE
            .captures(rest.trim())
            .ok_or_else(|| Error::InvalidVersion(text.to_string()))?;

        Ok(Self {
            op,
            version: format!("{}{}", &caps[1], &caps[2]),
            suffix: caps[3].to_string(),
            build,
        })
    }

    /// A selector that admits every version
    pub fn any() -> Self {
        Self {
            op: VersionOp::Any,
            version: String::new(),
            suffix: String::new(),
            build: String::new(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.op == VersionOp::Any || self.version.is_empty()
    }

    /// Parsed ordering key of the version part (condition ignored)
    fn key(&self) -> VersionKey {
        VersionKey::new(&self.version, &self.suffix)
    }

    /// Check whether a concrete candidate version satisfies this selector
    pub fn admits(&self, candidate: &VersionSelector) -> bool {
        if self.is_any() {
            return true;
        }

        let ours = self.key();
        let theirs = candidate.key();
        let ord = theirs.cmp(&ours);

        match self.op {
            VersionOp::Any => true,
            VersionOp::Equal => ord == Ordering::Equal,
            VersionOp::Not => ord != Ordering::Equal,
            VersionOp::Less => ord == Ordering::Less,
            VersionOp::LessOrEqual => ord != Ordering::Greater,
            VersionOp::Greater => ord == Ordering::Greater,
            VersionOp::GreaterOrEqual => ord != Ordering::Less,
            VersionOp::AnyRevision => ours.numeric_eq(&theirs),
            VersionOp::Prefix => {
                let upper = VersionKey::new(&next_version(&self.version), "");
                ord != Ordering::Less && theirs < upper
            }
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return Ok(());
        }
        write!(f, "{}{}{}", self.op.prefix(), self.version, self.suffix)?;
        if self.op == VersionOp::Prefix {
            write!(f, "*")?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

/// Increment the last numeric segment: `1.0` -> `1.1`, `1.2.9` -> `1.2.10`
pub fn next_version(version: &str) -> String {
    let numeric: &str = version.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let mut segments: Vec<u64> = numeric
        .split('.')
        .map(|s| s.parse::<u64>().unwrap_or(0))
        .collect();
    if let Some(last) = segments.last_mut() {
        *last += 1;
    }
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Suffix ranks, lowest first; a missing suffix ranks between `_rc` and `_p`
fn suffix_rank(kind: &str) -> i8 {
    match kind {
        "alpha" => 0,
        "beta" => 1,
        "pre" => 2,
        "rc" => 3,
        "p" => 5,
        _ => 4,
    }
}

const NO_SUFFIX: (i8, u64) = (4, 0);

/// Ordering key for a structured version
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionKey {
    segments: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<(i8, u64)>,
    revision: u64,
    /// Unrecognised suffix text, compared last
    other: String,
}

impl VersionKey {
    fn new(version: &str, suffix: &str) -> Self {
        let letter = version.chars().last().filter(|c| c.is_ascii_alphabetic());
        let numeric = version.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        let segments = numeric
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>().unwrap_or(u64::MAX))
            .collect();

        let mut suffixes = Vec::new();
        let mut rest = suffix;
        while let Some(caps) = SUFFIX_RE.captures(rest) {
            let number = caps[2].parse::<u64>().unwrap_or(0);
            suffixes.push((suffix_rank(&caps[1]), number));
            rest = &rest[caps[0].len()..];
        }

        let (revision, other) = match REVISION_RE.captures(rest) {
            Some(caps) => (caps[1].parse::<u64>().unwrap_or(0), String::new()),
            None => (0, rest.to_string()),
        };

        Self {
            segments,
            letter,
            suffixes,
            revision,
            other,
        }
    }

    fn numeric_eq(&self, other: &VersionKey) -> bool {
        compare_segments(&self.segments, &other.segments) == Ordering::Equal
            && self.letter == other.letter
    }
}

fn compare_segments(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_segments(&self.segments, &other.segments)
            .then_with(|| self.letter.cmp(&other.letter))
            .then_with(|| {
                let len = self.suffixes.len().max(other.suffixes.len());
                for i in 0..len {
                    let a = self.suffixes.get(i).copied().unwrap_or(NO_SUFFIX);
                    let b = other.suffixes.get(i).copied().unwrap_or(NO_SUFFIX);
                    match a.cmp(&b) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                Ordering::Equal
            })
            .then_with(|| self.revision.cmp(&other.revision))
            .then_with(|| debian::compare(&self.other, &other.other))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Check whether `candidate` satisfies `selector`
///
/// Unparsable input on either side is treated as a non-match.
pub fn admit(selector: &str, candidate: &str) -> bool {
    let selector = match VersionSelector::parse(selector) {
        Ok(s) => s,
        Err(_) => return false,
    };
    if selector.is_any() {
        return true;
    }
    match VersionSelector::parse(candidate) {
        Ok(c) => selector.admits(&c),
        Err(_) => false,
    }
}

/// Compare two concrete versions
///
/// Structured versions compare by numeric prefix, suffix and revision.
/// Anything else falls back to the SemVer/Debian hybrid ordering.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (VersionSelector::parse(a), VersionSelector::parse(b)) {
        (Ok(x), Ok(y)) if x.op == VersionOp::Equal && y.op == VersionOp::Equal => {
            x.key().cmp(&y.key())
        }
        _ => hybrid_compare(a, b),
    }
}

/// Replace `_` with `-` so gentoo-style suffixes read as SemVer pre-releases
pub fn sanitize(version: &str) -> String {
    version.replace('_', "-")
}

/// Parse a sanitised version as SemVer, padding `1` / `1.2` to `1.0.0` / `1.2.0`
fn lenient_semver(version: &str) -> Option<semver::Version> {
    if let Ok(v) = semver::Version::parse(version) {
        return Some(v);
    }

    let split = version.find(['-', '+']).unwrap_or(version.len());
    let (core, tail) = version.split_at(split);
    if core.is_empty() || !core.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    semver::Version::parse(&format!("{}{}", parts.join("."), tail)).ok()
}

fn hybrid_compare(a: &str, b: &str) -> Ordering {
    let sa = sanitize(a);
    let sb = sanitize(b);
    match (lenient_semver(&sa), lenient_semver(&sb)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => debian::compare(&sa, &sb),
    }
}

/// Sort version strings ascending
///
/// Every input is sanitised and parsed as SemVer; if all of them parse, the
/// SemVer order is used, otherwise every input is ordered with Debian rules.
/// The original (unsanitised) strings are returned.
pub fn sort_versions(versions: &[String]) -> Vec<String> {
    let mut sanitized: Vec<(String, &String)> =
        versions.iter().map(|v| (sanitize(v), v)).collect();

    let parsed: Option<Vec<semver::Version>> =
        sanitized.iter().map(|(s, _)| lenient_semver(s)).collect();

    match parsed {
        Some(parsed) => {
            let mut pairs: Vec<(semver::Version, &String)> = parsed
                .into_iter()
                .zip(sanitized.iter().map(|(_, orig)| *orig))
                .collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
            pairs.into_iter().map(|(_, orig)| orig.clone()).collect()
        }
        None => {
            sanitized.sort_by(|a, b| debian::compare(&a.0, &b.0).then_with(|| a.1.cmp(b.1)));
            sanitized.into_iter().map(|(_, orig)| orig.clone()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operators() {
        let s = VersionSelector::parse(">=1.0").unwrap();
        assert_eq!(s.op, VersionOp::GreaterOrEqual);
        assert_eq!(s.version, "1.0");

        assert_eq!(VersionSelector::parse("<=2").unwrap().op, VersionOp::LessOrEqual);
        assert_eq!(VersionSelector::parse("<2").unwrap().op, VersionOp::Less);
        assert_eq!(VersionSelector::parse(">2").unwrap().op, VersionOp::Greater);
        assert_eq!(VersionSelector::parse("!2").unwrap().op, VersionOp::Not);
        assert_eq!(VersionSelector::parse("~2").unwrap().op, VersionOp::AnyRevision);
        assert_eq!(VersionSelector::parse("=1.0*").unwrap().op, VersionOp::Prefix);
    }

    #[test]
    fn test_bare_version_is_equal() {
        let s = VersionSelector::parse("1.2.3").unwrap();
        assert_eq!(s.op, VersionOp::Equal);
        assert_eq!(s.version, "1.2.3");
    }

    #[test]
    fn test_parse_suffix_and_build() {
        let s = VersionSelector::parse("1.2_rc1-r2+git20200101").unwrap();
        assert_eq!(s.version, "1.2");
        assert_eq!(s.suffix, "_rc1-r2");
        assert_eq!(s.build, "git20200101");
        assert_eq!(s.to_string(), "=1.2_rc1-r2+git20200101");
    }

    #[test]
    fn test_wildcard_requires_equal() {
        assert!(VersionSelector::parse(">=1.0*").is_err());
        assert!(VersionSelector::parse("1.0*").is_err());
    }

    #[test]
    fn test_invalid_version() {
        let err = VersionSelector::parse(">=abc").unwrap_err();
        assert!(matches!(err, Error::InvalidVersion(_)));
    }

    #[test]
    fn test_admit_laws() {
        for v in ["1.0", "2.3.4", "0.9_rc1", "1.0-r3"] {
            assert!(admit(&format!("={}", v), v), "={} admits {}", v, v);
            assert!(admit(&format!(">={}", v), v));
            assert!(!admit(&format!("!{}", v), v));
        }
        assert!(admit(">=1.0", "1.1"));
        assert!(admit(">=1.0", "1.0_p1"));
        assert!(!admit(">=1.0", "1.0_rc1"));
        assert!(admit("<1.0", "0.9.9"));
        assert!(!admit("<1.0", "1.0"));
    }

    #[test]
    fn test_admit_any_revision() {
        assert!(admit("~1.0-r1", "1.0-r2"));
        assert!(admit("~1.0", "1.0_rc3"));
        assert!(!admit("~1.0-r1", "1.1-r1"));
    }

    #[test]
    fn test_admit_prefix() {
        assert!(admit("=1.0*", "1.0"));
        assert!(admit("=1.0*", "1.0.5"));
        assert!(!admit("=1.0*", "1.1"));
        assert!(!admit("=1.0*", "0.9"));
    }

    #[test]
    fn test_empty_selector_admits_all() {
        assert!(admit("", "1.0"));
        assert!(admit("", "whatever"));
        assert!(admit(">=", "1.0"));
        for op in ["<", "<=", ">", "=", "~", "=*"] {
            assert!(admit(op, "2.4.1"), "{} should admit any version", op);
        }
    }

    #[test]
    fn test_unparsable_candidate_never_matches() {
        assert!(!admit(">=1.0", "not-a-version"));
    }

    #[test]
    fn test_revision_ordering() {
        assert_eq!(compare_versions("1.0-r1", "1.0-r2"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "1.0-r1"), Ordering::Less);
        assert_eq!(compare_versions("1.0_alpha", "1.0_beta"), Ordering::Less);
        assert_eq!(compare_versions("1.0_p2", "1.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
    }

    #[test]
    fn test_next_version() {
        assert_eq!(next_version("1.0"), "1.1");
        assert_eq!(next_version("1.2.9"), "1.2.10");
        assert_eq!(next_version("3"), "4");
    }

    #[test]
    fn test_sort_semver() {
        let sorted = sort_versions(&[
            "1.10".to_string(),
            "1.2_rc1".to_string(),
            "1.2".to_string(),
            "0.9".to_string(),
        ]);
        assert_eq!(sorted, vec!["0.9", "1.2_rc1", "1.2", "1.10"]);
    }

    #[test]
    fn test_sort_falls_back_to_debian() {
        let sorted = sort_versions(&[
            "1:0.1".to_string(),
            "2.0~beta".to_string(),
            "2.0".to_string(),
            "1.9.9.9".to_string(),
        ]);
        assert_eq!(sorted, vec!["1.9.9.9", "2.0~beta", "2.0", "1:0.1"]);
    }
}
