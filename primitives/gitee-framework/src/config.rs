//! Config agent: loads a YAML config file and hot-reloads it.
//!
//! The agent stores the parsed value type-erased, so one agent type serves
//! every robot. Robots read it back through a [`ConfigProvider`], which
//! checks the stored value has the expected shape.

use std::{
    any::Any,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwapOption;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

/// How often the config file is checked for changes.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised while loading or reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config has not been loaded")]
    NotLoaded,

    #[error("can't convert to configuration")]
    Conversion,
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// A robot configuration the agent can load.
pub trait Config: DeserializeOwned + Send + Sync + 'static {
    /// Fills in values the file left out. Runs before [`Config::validate`].
    fn set_default(&mut self) {}

    fn validate(&self) -> Result<(), ConfigError>;
}

/// A loaded configuration and the SHA-256 of the file it came from.
#[derive(Clone)]
pub struct Snapshot {
    pub version: String,
    pub config: AnyConfig,
}

/// A loaded config with its concrete type erased.
pub type AnyConfig = Arc<dyn Any + Send + Sync>;

type Loader = Arc<dyn Fn(&Path, &[u8]) -> Result<AnyConfig, ConfigError> + Send + Sync>;

/// Loads a config file once and re-reads it whenever its content changes.
pub struct ConfigAgent {
    loader: Loader,
    current: Arc<ArcSwapOption<Snapshot>>,
    interval: Duration,
    reloader: Option<JoinHandle<()>>,
}

impl ConfigAgent {
    /// Creates an agent that parses files into `C`.
    pub fn new<C: Config>() -> Self {
        let loader: Loader = Arc::new(|path: &Path, raw: &[u8]| {
            let mut config: C =
                serde_yaml_ng::from_slice(raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            config.set_default();
            config.validate()?;
            Ok(Arc::new(config) as AnyConfig)
        });

        Self {
            loader,
            current: Arc::new(ArcSwapOption::empty()),
            interval: DEFAULT_RELOAD_INTERVAL,
            reloader: None,
        }
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Loads `path` and starts watching it. Fails without spawning anything
    /// when the first load fails.
    pub async fn start(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = load(&self.loader, &path).await?;
        tracing::info!(path = %path.display(), version = %snapshot.version, "config loaded");
        self.current.store(Some(Arc::new(snapshot)));

        self.stop();
        self.reloader = Some(tokio::spawn(reload_loop(
            path,
            Arc::clone(&self.loader),
            Arc::clone(&self.current),
            self.interval,
        )));

        Ok(())
    }

    /// Returns the latest snapshot, or `None` before the first load.
    pub fn get_config(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.reloader.take() {
            handle.abort();
            tracing::debug!("config agent stopped");
        }
    }

    /// A typed view of this agent's config.
    pub fn provider<C: Config>(&self) -> AgentConfigProvider<C> {
        AgentConfigProvider {
            current: Arc::clone(&self.current),
            _config: PhantomData,
        }
    }
}

impl Drop for ConfigAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

fn version_of(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

async fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    tokio::fs::read(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn load(loader: &Loader, path: &Path) -> Result<Snapshot, ConfigError> {
    let raw = read(path).await?;
    let config = loader(path, &raw)?;
    Ok(Snapshot {
        version: version_of(&raw),
        config,
    })
}

async fn reload_loop(
    path: PathBuf,
    loader: Loader,
    current: Arc<ArcSwapOption<Snapshot>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let raw = match read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "failed to re-read config, keeping previous");
                continue;
            }
        };

        let version = version_of(&raw);
        let unchanged = current
            .load()
            .as_deref()
            .is_some_and(|s| s.version == version);
        if unchanged {
            continue;
        }

        match loader(&path, &raw) {
            Ok(config) => {
                current.store(Some(Arc::new(Snapshot {
                    version: version.clone(),
                    config,
                })));
                tracing::info!(path = %path.display(), %version, "config reloaded");
            }
            Err(e) => {
                tracing::error!(error = %e, "rejected config update, keeping previous");
            }
        }
    }
}

/// Source of the current robot configuration.
pub trait ConfigProvider<C>: Send + Sync {
    fn current(&self) -> Result<Arc<C>, ConfigError>;
}

/// Reads a [`ConfigAgent`]'s latest snapshot as `C`.
pub struct AgentConfigProvider<C> {
    current: Arc<ArcSwapOption<Snapshot>>,
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> ConfigProvider<C> for AgentConfigProvider<C> {
    fn current(&self) -> Result<Arc<C>, ConfigError> {
        let snapshot = self.current.load_full().ok_or(ConfigError::NotLoaded)?;
        Arc::clone(&snapshot.config)
            .downcast::<C>()
            .map_err(|_| ConfigError::Conversion)
    }
}
