//! Core reference types.
//!
//! References are named pointers into commit history: branches (mutable
//! tips), tags (immutable), and `HEAD`, the one symbolic reference.

use serde::{Deserialize, Serialize};
use quadgit_types::ObjectId;

/// Name of the symbolic head reference.
pub const HEAD: &str = "HEAD";
/// Namespace of branch references.
pub const BRANCH_PREFIX: &str = "refs/heads/";
/// Namespace of tag references.
pub const TAG_PREFIX: &str = "refs/tags/";

/// Full reference name of a branch (e.g. "refs/heads/main").
pub fn branch_ref(name: &str) -> String {
    format!("{BRANCH_PREFIX}{name}")
}

/// Full reference name of a tag (e.g. "refs/tags/v1").
pub fn tag_ref(name: &str) -> String {
    format!("{TAG_PREFIX}{name}")
}

/// What a stored reference points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefTarget {
    /// A commit.
    Direct(ObjectId),
    /// Another reference, by full name. Only `HEAD` is symbolic.
    Symbolic(String),
}

/// A resolved reference binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub target: ObjectId,
}

impl Reference {
    /// The name without its `refs/heads/` or `refs/tags/` namespace.
    pub fn short_name(&self) -> &str {
        self.name
            .strip_prefix(BRANCH_PREFIX)
            .or_else(|| self.name.strip_prefix(TAG_PREFIX))
            .unwrap_or(&self.name)
    }

    pub fn is_branch(&self) -> bool {
        self.name.starts_with(BRANCH_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.name.starts_with(TAG_PREFIX)
    }
}

/// The state of HEAD: either symbolic (naming a branch) or detached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Head {
    /// HEAD names a branch by short name.
    Symbolic(String),
    /// HEAD points directly at a commit.
    Detached(ObjectId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_strip_namespace() {
        let id = ObjectId::null();
        let branch = Reference {
            name: branch_ref("feature/x"),
            target: id,
        };
        let tag = Reference {
            name: tag_ref("v1"),
            target: id,
        };
        assert_eq!(branch.short_name(), "feature/x");
        assert!(branch.is_branch());
        assert_eq!(tag.short_name(), "v1");
        assert!(tag.is_tag());
    }
}
