//! Logical ID allocation.
//!
//! A logical ID is derived from the construct path inside the stack: a
//! readable prefix made of the path components plus an 8-character hash of
//! the full path, so that two constructs whose readable parts collide still
//! get distinct IDs.

use crate::error::{Error, Result};

/// Path component that is removed entirely.
const HIDDEN_ID: &str = "Default";
/// Path component that is hashed but not shown in the readable part.
const HIDDEN_FROM_HUMAN_ID: &str = "Resource";
/// CloudFormation's limit on logical ID length.
const MAX_ID_LEN: usize = 255;
const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;

/// Allocate a logical ID for the given path components.
pub fn make_unique_id(components: &[&str]) -> Result<String> {
    let components: Vec<&str> = components
        .iter()
        .copied()
        .filter(|c| *c != HIDDEN_ID)
        .collect();

    if components.is_empty() {
        return Err(Error::validation(
            "",
            "unable to calculate a logical ID for an empty construct path",
        ));
    }
    if let Some(bad) = components.iter().find(|c| c.is_empty() || c.contains('/')) {
        return Err(Error::validation(
            components.join("/"),
            format!("invalid path component '{}'", bad),
        ));
    }

    if components.len() == 1 {
        let candidate = remove_non_alphanumeric(components[0]);
        if !candidate.is_empty() && candidate.len() <= MAX_ID_LEN {
            return Ok(candidate);
        }
    }

    let hash = path_hash(&components);
    let human: String = remove_dupes(&components)
        .into_iter()
        .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
        .map(remove_non_alphanumeric)
        .collect::<String>()
        .chars()
        .take(MAX_HUMAN_LEN)
        .collect();

    Ok(format!("{}{}", human, hash))
}

/// First [`HASH_LEN`] uppercase hex digits of the MD5 of the joined path.
fn path_hash(components: &[&str]) -> String {
    let digest = md5::compute(components.join("/"));
    format!("{:x}", digest)[..HASH_LEN].to_uppercase()
}

/// Remove consecutive duplicate components (`Foo/Foo/Bar` reads as `FooBar`).
fn remove_dupes<'a>(components: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(components.len());
    for c in components {
        if out.last() != Some(c) {
            out.push(c);
        }
    }
    out
}

fn remove_non_alphanumeric(s: &str) -> String {
    s.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Keep only characters CloudFormation accepts in output IDs and names.
pub fn sanitize(s: &str) -> String {
    remove_non_alphanumeric(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_component_is_verbatim() {
        assert_eq!(make_unique_id(&["CachePolicy"]).unwrap(), "CachePolicy");
        assert_eq!(make_unique_id(&["My-Thing_1"]).unwrap(), "MyThing1");
    }

    #[test]
    fn test_resource_is_hidden_but_hashed() {
        assert_eq!(make_unique_id(&["Vpc", "Resource"]).unwrap(), "Vpc8378EB38");
        assert_eq!(
            make_unique_id(&["Vpc", "PublicSubnet1", "Subnet"]).unwrap(),
            "VpcPublicSubnet1Subnet5C2D37C4"
        );
        assert_eq!(make_unique_id(&["Vpc", "IGW"]).unwrap(), "VpcIGWD7BA715C");
    }

    #[test]
    fn test_default_is_dropped() {
        assert_eq!(
            make_unique_id(&["Vpc", "Default", "Resource"]).unwrap(),
            make_unique_id(&["Vpc", "Resource"]).unwrap()
        );
    }

    #[test]
    fn test_hash_disambiguates() {
        let a = make_unique_id(&["A", "BC"]).unwrap();
        let b = make_unique_id(&["AB", "C"]).unwrap();
        assert!(a.starts_with("ABC"));
        assert!(b.starts_with("ABC"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let id = make_unique_id(&["Service", "Service", "Role"]).unwrap();
        assert!(id.starts_with("ServiceRole"));
        assert_eq!(id.len(), "ServiceRole".len() + HASH_LEN);
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(make_unique_id(&[]).is_err());
        assert!(make_unique_id(&["Default"]).is_err());
        assert!(make_unique_id(&["A", ""]).is_err());
    }
}
