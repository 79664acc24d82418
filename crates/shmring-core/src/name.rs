//! Bounded, validated segment names
//!
//! Segment and lock names end up as POSIX shared memory object names, which
//! are path-like and length-limited. Validation happens once, at construction;
//! nothing downstream truncates.

use crate::{Error, Result};

/// Maximum accepted name length in bytes.
///
/// Leaves room for the leading `/` the OS name requires and the `.lock`
/// suffix of the paired lock object within common NAME_MAX limits.
pub const MAX_NAME_LEN: usize = 120;

const LOCK_SUFFIX: &str = ".lock";

/// A validated cross-process segment identifier.
///
/// Legal names are non-empty, at most [`MAX_NAME_LEN`] bytes, and consist of
/// ASCII alphanumerics plus `_`, `-` and `.`. The leading `/` of the OS-level
/// object name is added internally and must not be part of the name itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    name: String,
}

impl SegmentName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidName("name is empty".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName(format!(
                "name is {} bytes, maximum is {}",
                name.len(),
                MAX_NAME_LEN
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::InvalidName(format!(
                "illegal character {c:?} in `{name}`"
            )));
        }
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// The name as given by the caller.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// OS-level object name of the memory segment.
    pub fn segment_os_name(&self) -> String {
        format!("/{}", self.name)
    }

    /// OS-level object name of the paired lock.
    pub fn lock_os_name(&self) -> String {
        format!("/{}{}", self.name, LOCK_SUFFIX)
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for ok in ["demo", "a", "my-ring.0", "UPPER_lower_123"] {
            let name = SegmentName::new(ok).unwrap();
            assert_eq!(name.as_str(), ok);
            assert_eq!(name.segment_os_name(), format!("/{ok}"));
            assert_eq!(name.lock_os_name(), format!("/{ok}.lock"));
        }
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(matches!(
            SegmentName::new(""),
            Err(Error::InvalidName(_))
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            SegmentName::new(&long),
            Err(Error::InvalidName(_))
        ));
        // Exactly at the limit is fine.
        let at_limit = "x".repeat(MAX_NAME_LEN);
        assert!(SegmentName::new(&at_limit).is_ok());
    }

    #[test]
    fn rejects_separators_and_controls() {
        for bad in ["/demo", "a/b", "sp ace", "nul\0", "tab\t", "ütf"] {
            assert!(
                matches!(SegmentName::new(bad), Err(Error::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
