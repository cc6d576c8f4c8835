//! Repository filters for per-repo robot config items.
//!
//! An entry in `repos` is either an org (`openeuler`) or a full repo name
//! (`openeuler/kernel`). `excluded_repos` only takes full names.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFilter {
    /// Orgs or `org/repo` names this item applies to.
    #[serde(default)]
    pub repos: Vec<String>,

    /// `org/repo` names excluded from an org-wide entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_repos: Vec<String>,
}

impl RepoFilter {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repos.is_empty() {
            return Err(ConfigError::invalid("the repos must be set"));
        }

        if let Some(bad) = self.excluded_repos.iter().find(|r| !is_full_name(r)) {
            return Err(ConfigError::invalid(format!(
                "excluded repo '{bad}' must be in the form org/repo"
            )));
        }

        Ok(())
    }

    /// Whether this filter covers `org/repo`.
    pub fn can_apply(&self, org: &str, repo: &str) -> bool {
        let full_name = format!("{org}/{repo}");
        if self.excludes(&full_name) {
            return false;
        }

        self.repos.iter().any(|r| r == org || *r == full_name)
    }

    fn lists(&self, name: &str) -> bool {
        self.repos.iter().any(|r| r == name)
    }

    fn excludes(&self, full_name: &str) -> bool {
        self.excluded_repos.iter().any(|r| r == full_name)
    }
}

/// Types that carry a [`RepoFilter`].
pub trait HasRepoFilter {
    fn repo_filter(&self) -> &RepoFilter;
}

impl HasRepoFilter for RepoFilter {
    fn repo_filter(&self) -> &RepoFilter {
        self
    }
}

/// Picks the item for `org/repo`.
///
/// An item naming the repo exactly beats any org-wide item. Among org-wide
/// items the first one that does not exclude the repo wins.
pub fn find<T: HasRepoFilter>(org: &str, repo: &str, items: &[T]) -> Option<usize> {
    let full_name = format!("{org}/{repo}");
    let mut org_match = None;

    for (i, item) in items.iter().enumerate() {
        let filter = item.repo_filter();
        if filter.lists(&full_name) {
            return Some(i);
        }

        if org_match.is_none() && filter.lists(org) && !filter.excludes(&full_name) {
            org_match = Some(i);
        }
    }

    org_match
}

fn is_full_name(name: &str) -> bool {
    matches!(name.split_once('/'), Some((org, repo)) if !org.is_empty() && !repo.is_empty() && !repo.contains('/'))
}
