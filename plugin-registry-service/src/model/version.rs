use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(\d+)!)?v?(\d+(?:\.\d+)*)(.*)$").expect("invalid version pattern")
});

static SPECIFIER_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s,])(\s+)").expect("invalid specifier pattern"));

/// Formats a version number into a string that sorts correctly under plain
/// lexicographic ordering: two digit epoch prefix, each numeric release
/// segment zero padded to four digits, pre-release/build remainder appended
/// lowercased. Versions without a leading numeric release fall back to the
/// raw string.
pub fn version_sort_key(version: &str) -> String {
    let Some(captures) = VERSION_PATTERN.captures(version) else {
        return version.to_string();
    };
    let epoch: u64 = captures
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let release = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('.')
        .map(|segment| match segment.parse::<u64>() {
            Ok(number) => format!("{number:04}"),
            Err(_) => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".");
    let rest = captures
        .get(3)
        .map(|m| m.as_str().trim().to_lowercase())
        .unwrap_or_default();
    format!("{epoch:02}!{release}{rest}")
}

/// Parses a plugin version leniently: an optional `v` prefix is stripped and
/// partial releases are padded to three segments (`1.2` becomes `1.2.0`).
pub fn parse_version_lenient(version: &str) -> Option<Version> {
    let captures = VERSION_PATTERN.captures(version)?;
    if captures.get(1).is_some() {
        // epoch releases have no semver equivalent
        return None;
    }
    let mut segments: Vec<String> = captures
        .get(2)?
        .as_str()
        .split('.')
        .map(ToString::to_string)
        .collect();
    if segments.len() > 3 {
        return None;
    }
    while segments.len() < 3 {
        segments.push("0".to_string());
    }
    let rest = captures.get(3).map(|m| m.as_str().trim()).unwrap_or("");
    Version::parse(&format!("{}{}", segments.join("."), rest)).ok()
}

/// Whether the string is a single concrete version (as opposed to a version
/// requirement potentially matching many versions).
pub fn is_single_version(version: &str) -> bool {
    parse_version_lenient(version).is_some()
}

/// Parses a version requirement set. Requirements separated by whitespace
/// instead of commas are accepted (`>=1.0.0 <2.0.0`).
pub fn parse_version_req(requirement: &str) -> Result<VersionReq, semver::Error> {
    let normalized = SPECIFIER_WHITESPACE.replace_all(requirement.trim(), "$1,$2");
    VersionReq::parse(&normalized)
}

/// Whether `version` satisfies `requirement`. A requirement that is itself a
/// single version matches by equality, unparseable inputs never match.
pub fn version_matches_requirement(version: &str, requirement: &str) -> bool {
    if version == requirement {
        return true;
    }
    let Some(parsed) = parse_version_lenient(version) else {
        return false;
    };
    match parse_version_req(requirement) {
        Ok(req) => req.matches(&parsed),
        Err(_) => match parse_version_lenient(requirement) {
            Some(single) => parsed == single,
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn sort_key_pads_release_segments() {
        assert_eq!(version_sort_key("1.2.3"), "00!0001.0002.0003");
        assert_eq!(version_sort_key("0.9"), "00!0000.0009");
        assert_eq!(version_sort_key("v1.10"), "00!0001.0010");
    }

    #[test]
    fn sort_key_orders_versions_lexicographically() {
        let mut versions = ["1.10.0", "1.2.0", "0.9", "2.0.0", "1.2.1"];
        versions.sort_by_key(|v| version_sort_key(v));
        assert_eq!(versions, ["0.9", "1.2.0", "1.2.1", "1.10.0", "2.0.0"]);
    }

    #[test]
    fn sort_key_keeps_epoch_and_suffixes() {
        assert_eq!(version_sort_key("2!1.0"), "02!0001.0000");
        assert_eq!(version_sort_key("1.0.0-RC.1"), "00!0001.0000.0000-rc.1");
    }

    #[test]
    fn sort_key_falls_back_to_raw_string() {
        assert_eq!(version_sort_key("latest"), "latest");
    }

    #[test]
    fn lenient_parsing_pads_partial_versions() {
        assert_eq!(
            parse_version_lenient("1.2"),
            Some(Version::parse("1.2.0").unwrap())
        );
        assert_eq!(
            parse_version_lenient("v2"),
            Some(Version::parse("2.0.0").unwrap())
        );
        assert!(parse_version_lenient("not-a-version").is_none());
    }

    #[test]
    fn requirements_accept_whitespace_separators() {
        let req = parse_version_req(">=1.0.0 <2.0.0").unwrap();
        assert!(req.matches(&Version::parse("1.2.0").unwrap()));
        assert!(!req.matches(&Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn requirement_matching_follows_the_range() {
        assert!(version_matches_requirement("1.2", ">=1.0.0,<2.0.0"));
        assert!(!version_matches_requirement("0.9", ">=1.0.0,<2.0.0"));
        assert!(!version_matches_requirement("2.0", ">=1.0.0,<2.0.0"));
        assert!(version_matches_requirement("weird-version", "weird-version"));
        assert!(!version_matches_requirement("weird-version", ">=1.0.0"));
    }
}
