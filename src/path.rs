//! Mount-relative path handling.
//!
//! Paths inside a mount are sequences of validated components. The root is
//! the empty sequence.

use crate::error::{GroveError, Result};

/// Check that `name` is usable as a single directory entry name.
pub fn validate_component(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(GroveError::InvalidArgument(format!(
            "invalid path component '{}'",
            name
        )));
    }
    Ok(())
}

/// Split a mount-relative path into components.
///
/// Repeated and trailing slashes are tolerated; `.`/`..` and absolute paths
/// are rejected.
pub fn split_relative(path: &str) -> Result<Vec<String>> {
    if path.starts_with('/') {
        return Err(GroveError::InvalidArgument(format!(
            "'{}' must be relative to the mount root",
            path
        )));
    }
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(|c| {
            validate_component(c)?;
            Ok(c.to_string())
        })
        .collect()
}

pub fn join_components(components: &[String]) -> String {
    components.join("/")
}

/// Compute the mount-relative location a symlink target names.
///
/// `link_dir` is the directory containing the symlink; `link_path` is only
/// used for error messages.
pub fn resolve_link_target(link_dir: &[String], target: &str, link_path: &str) -> Result<Vec<String>> {
    if target.starts_with('/') {
        return Err(GroveError::PermissionDenied(link_path.to_string()));
    }
    if target.is_empty() {
        return Err(GroveError::NotFound(link_path.to_string()));
    }

    let mut resolved = link_dir.to_vec();
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if resolved.pop().is_none() {
                    return Err(GroveError::CrossDevice(link_path.to_string()));
                }
            }
            name => resolved.push(name.to_string()),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn components(path: &str) -> Vec<String> {
        split_relative(path).unwrap()
    }

    #[rstest]
    #[case("", vec![])]
    #[case("a", vec!["a"])]
    #[case("a/b/c", vec!["a", "b", "c"])]
    #[case("a//b/", vec!["a", "b"])]
    fn test_split_relative(#[case] input: &str, #[case] expected: Vec<&str>) {
        assert_eq!(components(input), expected);
    }

    #[rstest]
    #[case("/abs")]
    #[case("a/../b")]
    #[case("./a")]
    fn test_split_relative_rejects(#[case] input: &str) {
        assert!(matches!(
            split_relative(input),
            Err(GroveError::InvalidArgument(_))
        ));
    }

    #[rstest]
    #[case("src", "test.c", "src/test.c")]
    #[case("", "src/c", "src/c")]
    #[case("d1/d2/d3", "../../foo.txt", "d1/foo.txt")]
    #[case("src", "../src/./selfloop", "src/selfloop")]
    #[case("src", "..", "")]
    fn test_resolve_link_target(#[case] dir: &str, #[case] target: &str, #[case] expected: &str) {
        let resolved = resolve_link_target(&components(dir), target, "link").unwrap();
        assert_eq!(join_components(&resolved), expected);
    }

    #[test]
    fn test_resolve_link_target_failures() {
        assert!(matches!(
            resolve_link_target(&[], "../outside_mount", "l"),
            Err(GroveError::CrossDevice(_))
        ));
        assert!(matches!(
            resolve_link_target(&components("a/b"), "../../../x", "l"),
            Err(GroveError::CrossDevice(_))
        ));
        assert!(matches!(
            resolve_link_target(&[], "/tmp", "l"),
            Err(GroveError::PermissionDenied(_))
        ));
        assert!(matches!(
            resolve_link_target(&[], "", "l"),
            Err(GroveError::NotFound(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_resolved_targets_are_normalized(
            dir in proptest::collection::vec("[a-z]{1,4}", 0..4),
            target in proptest::collection::vec(prop_oneof!["[a-z]{1,4}", Just("..".to_string()), Just(".".to_string())], 1..6),
        ) {
            let target = target.join("/");
            if let Ok(resolved) = resolve_link_target(&dir, &target, "link") {
                prop_assert!(resolved.iter().all(|c| c != ".." && c != "." && !c.is_empty()));
            }
        }
    }
}
