//! Secret agent: loads token files once and keeps them fresh.
//!
//! The agent reads every file at start and fails if any of them is missing
//! or empty. Afterwards a background task re-reads the files on an interval;
//! a failed reload keeps the previous value.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;

/// How often secret files are re-read.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can occur while loading secrets.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("failed to read secret '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("secret '{}' is empty", .0.display())]
    Empty(PathBuf),

    #[error("secret '{}' was not loaded by the agent", .0.display())]
    UnknownPath(PathBuf),
}

type SecretValue = Arc<ArcSwap<String>>;

/// Returns the current value of one secret.
///
/// Clones share the same slot, so a reload is visible to every holder.
#[derive(Clone)]
pub struct TokenGenerator {
    value: SecretValue,
}

impl TokenGenerator {
    /// Wraps a fixed token. Useful for clients built outside an agent.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            value: Arc::new(ArcSwap::from_pointee(token.into())),
        }
    }

    pub fn token(&self) -> Arc<String> {
        self.value.load_full()
    }
}

impl fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenGenerator(***)")
    }
}

/// Loads and periodically reloads a fixed set of secret files.
pub struct SecretAgent {
    secrets: HashMap<PathBuf, SecretValue>,
    reloader: Option<JoinHandle<()>>,
}

impl SecretAgent {
    /// Loads every path and starts reloading with the default interval.
    pub async fn start<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SecretError> {
        Self::start_with_interval(paths, DEFAULT_RELOAD_INTERVAL).await
    }

    pub async fn start_with_interval<P: AsRef<Path>>(
        paths: &[P],
        interval: Duration,
    ) -> Result<Self, SecretError> {
        let mut secrets = HashMap::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref().to_path_buf();
            let value = load_secret(&path).await?;
            secrets.insert(path, Arc::new(ArcSwap::from_pointee(value)));
        }

        let watched: Vec<(PathBuf, SecretValue)> = secrets
            .iter()
            .map(|(p, v)| (p.clone(), Arc::clone(v)))
            .collect();

        let reloader = tokio::spawn(reload_loop(watched, interval));

        tracing::debug!(count = secrets.len(), "secret agent started");

        Ok(Self {
            secrets,
            reloader: Some(reloader),
        })
    }

    /// Returns a generator for a path passed to [`SecretAgent::start`].
    pub fn token_generator(&self, path: impl AsRef<Path>) -> Result<TokenGenerator, SecretError> {
        let path = path.as_ref();
        self.secrets
            .get(path)
            .map(|value| TokenGenerator {
                value: Arc::clone(value),
            })
            .ok_or_else(|| SecretError::UnknownPath(path.to_path_buf()))
    }

    /// Stops the reload task. Loaded values remain readable.
    pub fn stop(&mut self) {
        if let Some(handle) = self.reloader.take() {
            handle.abort();
            tracing::debug!("secret agent stopped");
        }
    }
}

impl Drop for SecretAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn load_secret(path: &Path) -> Result<String, SecretError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SecretError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let value = raw.trim();
    if value.is_empty() {
        return Err(SecretError::Empty(path.to_path_buf()));
    }

    Ok(value.to_string())
}

async fn reload_loop(secrets: Vec<(PathBuf, SecretValue)>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately and the files were just read.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        for (path, slot) in &secrets {
            match load_secret(path).await {
                Ok(value) => {
                    if **slot.load() != value {
                        slot.store(Arc::new(value));
                        tracing::info!(path = %path.display(), "secret reloaded");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to reload secret, keeping previous value");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn start_loads_and_trims_tokens() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "token", "  abc123\n").await;

        let agent = SecretAgent::start(&[&path]).await.unwrap();
        let generator = agent.token_generator(&path).unwrap();
        assert_eq!(generator.token().as_str(), "abc123");
    }

    #[tokio::test]
    async fn missing_file_fails_start() {
        let err = SecretAgent::start(&[Path::new("/tmp/missing-robot-token")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SecretError::Read { .. }));
    }

    #[tokio::test]
    async fn empty_file_fails_start() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "token", " \n").await;

        let err = SecretAgent::start(&[&path]).await.err().unwrap();
        assert!(matches!(err, SecretError::Empty(_)));
    }

    #[tokio::test]
    async fn unknown_path_has_no_generator() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "token", "abc").await;

        let agent = SecretAgent::start(&[&path]).await.unwrap();
        assert!(matches!(
            agent.token_generator(dir.path().join("other")),
            Err(SecretError::UnknownPath(_))
        ));
    }

    #[tokio::test]
    async fn reload_picks_up_rotated_token() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "token", "first").await;

        let agent = SecretAgent::start_with_interval(&[&path], Duration::from_millis(20))
            .await
            .unwrap();
        let generator = agent.token_generator(&path).unwrap();

        tokio::fs::write(&path, "second").await.unwrap();

        let mut rotated = false;
        for _ in 0..50 {
            if generator.token().as_str() == "second" {
                rotated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(rotated);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_token() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "token", "kept").await;

        let agent = SecretAgent::start_with_interval(&[&path], Duration::from_millis(20))
            .await
            .unwrap();
        let generator = agent.token_generator(&path).unwrap();

        tokio::fs::remove_file(&path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(generator.token().as_str(), "kept");
    }

    #[test]
    fn debug_hides_token() {
        let generator = TokenGenerator::fixed("very-secret");
        assert!(!format!("{generator:?}").contains("very-secret"));
    }
}
