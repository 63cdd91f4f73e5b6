//! Tag set canonicalisation

use std::cmp::Ordering;

use crate::error::IndexError;

/// Sort tags in natural order and drop duplicates.
///
/// Two tag lists describing the same set always canonicalise to the same
/// vector, which is what lets the bucketed index use a tag set as an address.
pub fn canonical_tags(tags: &[String]) -> Vec<String> {
    let mut tags = tags.to_vec();
    tags.sort_by(|a, b| natural_cmp(a, b));
    tags.dedup();
    tags
}

/// Reject empty tag lists and empty tag names
pub fn validate_tags(tags: &[String]) -> Result<(), IndexError> {
    if tags.is_empty() {
        return Err(IndexError::EmptyTags);
    }
    if let Some(tag) = tags.iter().find(|t| t.is_empty()) {
        return Err(IndexError::InvalidTag(tag.clone()));
    }
    Ok(())
}

/// Whether `entry_tags` contains every tag in `query`
pub fn is_superset<S: AsRef<str>>(entry_tags: &[S], query: &[String]) -> bool {
    query
        .iter()
        .all(|q| entry_tags.iter().any(|t| t.as_ref() == q))
}

/// Natural string ordering: runs of ASCII digits compare by numeric value,
/// everything else compares byte-wise.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }

            let run_a = trim_leading_zeros(&a[start_a..i]);
            let run_b = trim_leading_zeros(&b[start_b..j]);
            let ord = run_a.len().cmp(&run_b.len()).then_with(|| run_a.cmp(run_b));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ord => return ord,
            }
        }
    }

    (a.len() - i)
        .cmp(&(b.len() - j))
        .then_with(|| a.cmp(b))
}

fn trim_leading_zeros(run: &[u8]) -> &[u8] {
    let zeros = run.iter().take_while(|&&c| c == b'0').count();
    &run[zeros..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("tag2", "tag10"), Ordering::Less);
        assert_eq!(natural_cmp("tag10", "tag2"), Ordering::Greater);
        assert_eq!(natural_cmp("a", "b"), Ordering::Less);
        assert_eq!(natural_cmp("page", "page1"), Ordering::Less);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
        assert_ne!(natural_cmp("tag01", "tag1"), Ordering::Equal);
    }

    #[test]
    fn test_canonical_tags() {
        assert_eq!(
            canonical_tags(&tags(&["tag10", "b", "tag2", "b"])),
            tags(&["b", "tag2", "tag10"])
        );
        assert_eq!(
            canonical_tags(&tags(&["x", "y"])),
            canonical_tags(&tags(&["y", "x"]))
        );
    }

    #[test]
    fn test_validate_tags() {
        assert!(validate_tags(&tags(&["a"])).is_ok());
        assert!(matches!(validate_tags(&[]), Err(IndexError::EmptyTags)));
        assert!(matches!(
            validate_tags(&tags(&["a", ""])),
            Err(IndexError::InvalidTag(_))
        ));
    }

    #[test]
    fn test_is_superset() {
        let entry = tags(&["a", "b", "c"]);
        assert!(is_superset(&entry, &tags(&["a", "c"])));
        assert!(is_superset(&entry, &[]));
        assert!(!is_superset(&entry, &tags(&["a", "d"])));
    }
}
