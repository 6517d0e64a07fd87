use serde::{Deserialize, Serialize};

use quadgit_merge::MergeConfig;
use quadgit_refs::validate_branch_name;
use quadgit_store::Keyspace;
use quadgit_types::Author;

use crate::error::{SdkError, SdkResult};

/// Settings of one repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Key prefix isolating this repository inside the backend.
    pub namespace: String,
    /// Branch created by `init` and named by HEAD afterwards.
    pub default_branch: String,
    /// Author of the root commit.
    pub author: Author,
    pub merge: MergeConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            default_branch: "main".into(),
            author: Author::system(),
            merge: MergeConfig::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = input[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            SdkError::Config(message)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(SdkError::Config(format!(
                "namespace {:?} must be non-empty and contain no '/'",
                self.namespace
            )));
        }
        validate_branch_name(&self.default_branch)
            .map_err(|e| SdkError::Config(format!("default_branch: {e}")))?;
        Ok(())
    }

    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.namespace.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadgit_merge::DeletionPolicy;

    #[test]
    fn defaults() {
        let c = RepositoryConfig::default();
        assert_eq!(c.namespace, "default");
        assert_eq!(c.default_branch, "main");
        assert_eq!(c.author, Author::system());
        assert_eq!(c.merge.deletion_policy, DeletionPolicy::Strict);
        assert!(c.merge.schema_graph.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let c = RepositoryConfig::from_toml_str(
            r#"
namespace = "people"
default_branch = "trunk"

[author]
name = "Ada"
email = "ada@example.org"

[merge]
deletion_policy = "three_way"
schema_graph = "ex:schema"
"#,
        )
        .unwrap();
        assert_eq!(c.namespace, "people");
        assert_eq!(c.default_branch, "trunk");
        assert_eq!(c.author.name, "Ada");
        assert_eq!(c.merge.deletion_policy, DeletionPolicy::ThreeWay);
        assert_eq!(c.merge.schema_graph.as_deref(), Some("ex:schema"));
    }

    #[test]
    fn unknown_fields_report_their_line() {
        let err = RepositoryConfig::from_toml_str("namespace = \"a\"\nbranch = \"x\"\n").unwrap_err();
        match err {
            SdkError::Config(message) => assert!(message.starts_with("line 2"), "{message}"),
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_names() {
        assert!(matches!(
            RepositoryConfig::from_toml_str("namespace = \"a/b\""),
            Err(SdkError::Config(_))
        ));
        assert!(matches!(
            RepositoryConfig::from_toml_str("default_branch = \"bad..name\""),
            Err(SdkError::Config(_))
        ));
    }
}
