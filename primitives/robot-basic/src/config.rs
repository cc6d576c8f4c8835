use gitee_framework::{Config, ConfigError, HasRepoFilter, RepoFilter, filter};
use serde::Deserialize;

/// Robot configuration, one item per group of repositories.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub config_items: Vec<BotConfig>,
}

impl Configuration {
    /// The item that applies to `org/repo`, if any.
    pub fn config_for(&self, org: &str, repo: &str) -> Option<&BotConfig> {
        filter::find(org, repo, &self.config_items).and_then(|i| self.config_items.get(i))
    }
}

impl Config for Configuration {
    fn set_default(&mut self) {
        for item in &mut self.config_items {
            item.set_default();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.config_items.iter().try_for_each(BotConfig::validate)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    #[serde(flatten)]
    pub repo_filter: RepoFilter,
}

impl BotConfig {
    fn set_default(&mut self) {}

    fn validate(&self) -> Result<(), ConfigError> {
        self.repo_filter.validate()
    }
}

impl HasRepoFilter for BotConfig {
    fn repo_filter(&self) -> &RepoFilter {
        &self.repo_filter
    }
}
