//! Semantic version comparison used by the `semver_*` matchers.
//!
//! This is deliberately looser than SemVer 2.0: targets may be partial (`"2"`, `"2.1"`), and a
//! partial target matches every version sharing its leading components. Pre-release and build
//! suffixes are compared as plain strings.
use std::cmp::Ordering;

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

fn is_pre_release(version: &str) -> bool {
    match (version.find('-'), version.find('+')) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(pre), Some(build)) => pre < build,
    }
}

fn is_build(version: &str) -> bool {
    match (version.find('+'), version.find('-')) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(build), Some(pre)) => build < pre,
    }
}

/// Compare two all-digit components by value, without a width limit.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Split `version` into numeric components followed by an optional suffix.
fn split_version(version: &str) -> Option<Vec<&str>> {
    if version.is_empty() || version.chars().any(char::is_whitespace) {
        return None;
    }

    let (prefix, suffix) = if is_pre_release(version) {
        version.split_once('-')?
    } else if is_build(version) {
        version.split_once('+')?
    } else {
        (version, "")
    };

    let mut parts: Vec<&str> = prefix.split('.').collect();
    if parts.len() > 3 || !parts.iter().all(|part| is_numeric(part)) {
        return None;
    }
    if !suffix.is_empty() {
        parts.push(suffix);
    }
    Some(parts)
}

/// Compare `user_version` against `target_version`.
///
/// Returns the ordering of the user version relative to the target, or `None` if either
/// version is malformed.
pub fn compare_versions(target_version: &str, user_version: &str) -> Option<Ordering> {
    let target_parts = split_version(target_version)?;
    let user_parts = split_version(user_version)?;

    for (idx, target_part) in target_parts.iter().enumerate() {
        let Some(user_part) = user_parts.get(idx) else {
            return Some(
                if is_pre_release(target_version) || is_build(target_version) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                },
            );
        };

        if is_numeric(user_part) && is_numeric(target_part) {
            match compare_numeric(user_part, target_part) {
                Ordering::Equal => {}
                other => return Some(other),
            }
        } else {
            if user_part < target_part {
                return Some(
                    if is_pre_release(target_version) && !is_pre_release(user_version) {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    },
                );
            }
            if user_part > target_part {
                return Some(
                    if !is_pre_release(target_version) && is_pre_release(user_version) {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    },
                );
            }
        }
    }

    if is_pre_release(user_version) && !is_pre_release(target_version) {
        return Some(Ordering::Less);
    }

    Some(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering::*;

    use super::compare_versions;

    #[test]
    fn compares_full_versions() {
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Some(Equal));
        assert_eq!(compare_versions("2.0.0", "2.0.1"), Some(Greater));
        assert_eq!(compare_versions("2.0.1", "2.0.0"), Some(Less));
        assert_eq!(compare_versions("1.10.0", "1.2.0"), Some(Less));
        assert_eq!(compare_versions("1.5.0", "1.13.0"), Some(Greater));
    }

    #[test]
    fn compares_components_wider_than_u64() {
        assert_eq!(compare_versions("1.99999999999999999999", "1.5"), Some(Less));
        assert_eq!(compare_versions("1.5", "1.99999999999999999999"), Some(Greater));
        assert_eq!(
            compare_versions("1.99999999999999999999", "1.099999999999999999999"),
            Some(Equal)
        );
        assert_eq!(compare_versions("1.010", "1.9"), Some(Less));
    }

    #[test]
    fn partial_targets_match_prefixes() {
        assert_eq!(compare_versions("2", "2.9.9"), Some(Equal));
        assert_eq!(compare_versions("2.0", "2.0.1"), Some(Equal));
        assert_eq!(compare_versions("2.1", "2.0.9"), Some(Less));
        assert_eq!(compare_versions("2.0.0", "2.0"), Some(Less));
    }

    #[test]
    fn pre_release_sorts_before_release() {
        assert_eq!(compare_versions("3.7.1", "3.7.1-beta"), Some(Less));
        assert_eq!(compare_versions("3.7.1-beta", "3.7.1"), Some(Greater));
        assert_eq!(compare_versions("3.7.1-beta", "3.7.1-beta"), Some(Equal));
        assert_eq!(compare_versions("3.7.1-alpha", "3.7.1-beta"), Some(Greater));
    }

    #[test]
    fn build_metadata_is_a_suffix() {
        assert_eq!(compare_versions("2.0.0+build", "2.0.0+build"), Some(Equal));
        assert_eq!(compare_versions("2.0.0+build", "2.0.0"), Some(Greater));
    }

    #[test]
    fn rejects_malformed_versions() {
        for invalid in ["", " ", "1.2.3 ", "3.7.2.2", "a.b.c", "1..2", "-beta", "1.2.x"] {
            assert_eq!(compare_versions(invalid, "1.0.0"), None, "target {invalid:?}");
            assert_eq!(compare_versions("1.0.0", invalid), None, "user {invalid:?}");
        }
    }
}
