//! Set of image references keyed by digest.

use std::collections::BTreeSet;

/// Unordered set of release image references.
///
/// Backed by an ordered set so iteration is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestSet {
    digests: BTreeSet<String>,
}

impl DigestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference. Empty references are ignored.
    pub fn insert(&mut self, digest: impl Into<String>) -> bool {
        let digest = digest.into();
        if digest.is_empty() {
            return false;
        }
        self.digests.insert(digest)
    }

    /// Union `other` into this set.
    pub fn merge(&mut self, other: &DigestSet) {
        self.digests.extend(other.digests.iter().cloned());
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.digests.contains(digest)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.digests.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for DigestSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = DigestSet::new();
        for digest in iter {
            set.insert(digest);
        }
        set
    }
}

/// Hex portion of a `sha256:` digest, or of a reference ending in `@sha256:<hex>`.
pub fn digest_hex(reference: &str) -> Option<&str> {
    let (_, hex) = reference.rsplit_once("sha256:")?;
    if hex.is_empty() {
        None
    } else {
        Some(hex)
    }
}
