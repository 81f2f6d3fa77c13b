//! PEP-440 version helpers on top of `pep440_rs`.

pub use pep440_rs::Version;

/// Additional version functionality
pub trait VersionExt {
    /// Checks whether the version is a final release (no pre or dev segment).
    fn is_stable(&self) -> bool;
}

impl VersionExt for Version {
    fn is_stable(&self) -> bool {
        !self.any_prerelease()
    }
}

/// Parse a version, returning `None` for anything malformed. Raw strings are
/// never compared directly; everything goes through this single comparator.
pub fn parse_lenient(text: &str) -> Option<Version> {
    text.trim().parse().ok()
}

/// Severity of the jump from `current` to `target`: 3 for a major bump, 2 for
/// a minor bump, 1 otherwise (including unparseable versions).
pub fn bump_severity(current: &str, target: &str) -> u32 {
    let (Some(old), Some(new)) = (parse_lenient(current), parse_lenient(target)) else {
        return 1;
    };
    let old_release = old.release();
    let new_release = new.release();
    let old_major = old_release.first().copied().unwrap_or(0);
    let new_major = new_release.first().copied().unwrap_or(0);
    if new_major > old_major {
        return 3;
    }
    let old_minor = old_release.get(1).copied().unwrap_or(0);
    let new_minor = new_release.get(1).copied().unwrap_or(0);
    if new_minor > old_minor { 2 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_release_is_stable() {
        let version = parse_lenient("1.2.3").unwrap();
        assert!(version.is_stable());
    }

    #[test]
    fn release_candidate_is_not_stable() {
        let version = parse_lenient("2.0.0rc1").unwrap();
        assert!(!version.is_stable());
    }

    #[test]
    fn dev_release_is_not_stable() {
        let version = parse_lenient("1.0.dev3").unwrap();
        assert!(!version.is_stable());
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(parse_lenient("not-a-version").is_none());
    }

    #[test]
    fn whitespace_is_tolerated() {
        assert!(parse_lenient(" 1.0.0 ").is_some());
    }

    #[test]
    fn major_bump_is_severity_three() {
        assert_eq!(bump_severity("1.9.9", "2.0.0"), 3);
    }

    #[test]
    fn minor_bump_is_severity_two() {
        assert_eq!(bump_severity("1.2.0", "1.3.0"), 2);
    }

    #[test]
    fn patch_bump_is_severity_one() {
        assert_eq!(bump_severity("1.2.0", "1.2.9"), 1);
    }

    #[test]
    fn unparseable_falls_back_to_severity_one() {
        assert_eq!(bump_severity("one.two", "2.0.0"), 1);
    }

    #[test]
    fn short_releases_compare_by_padding() {
        assert_eq!(bump_severity("1", "1.1"), 2);
        assert_eq!(bump_severity("1", "2"), 3);
    }
}
