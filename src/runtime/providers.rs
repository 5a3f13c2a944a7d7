/// Step collaborators handed to every executor
///
/// Credential lookup, blob storage and email delivery live outside the
/// orchestration core; these traits are the seams and the default
/// implementations keep a single-process deployment self-contained.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// Credential lookup by name for a user
#[async_trait]
pub trait AccessProvider: Send + Sync {
    async fn credential(&self, user_id: &str, name: &str) -> Result<Option<String>>;
}

/// Blob storage used by steps
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Outgoing email notifications
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// The collaborator set passed into each executor
#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn AccessProvider>,
    pub storage: Arc<dyn StorageProvider>,
    pub email: Arc<dyn EmailProvider>,
}

impl Collaborators {
    /// Env-backed credentials, filesystem storage under `file_root`, log-only email
    pub fn local(file_root: impl Into<PathBuf>) -> Self {
        Self {
            access: Arc::new(EnvAccessProvider),
            storage: Arc::new(FsStorageProvider::new(file_root)),
            email: Arc::new(LogEmailProvider),
        }
    }
}

/// Reads credentials from `PIPEWRIGHT_SECRET_<NAME>` environment variables
#[derive(Debug, Default)]
pub struct EnvAccessProvider;

#[async_trait]
impl AccessProvider for EnvAccessProvider {
    async fn credential(&self, _user_id: &str, name: &str) -> Result<Option<String>> {
        let key = format!(
            "PIPEWRIGHT_SECRET_{}",
            name.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_")
        );
        Ok(std::env::var(key).ok())
    }
}

/// Stores blobs as files below a root directory
#[derive(Debug, Clone)]
pub struct FsStorageProvider {
    root: PathBuf,
}

impl FsStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Keys are relative paths; anything escaping the root is refused
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            anyhow::bail!("storage key '{}' must be a relative path inside the file root", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageProvider for FsStorageProvider {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Logs emails instead of delivering them
#[derive(Debug, Default)]
pub struct LogEmailProvider;

#[async_trait]
impl EmailProvider for LogEmailProvider {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::info!("📧 Email to {}: {} ({} bytes)", to, subject, body.len());
        Ok(())
    }
}
