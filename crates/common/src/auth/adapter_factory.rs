use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use casbin::{Adapter, FileAdapter, MemoryAdapter};

use crate::domain::DomainResult;

/// Produces the casbin adapter a `PolicyCache` binds to.
#[async_trait]
pub trait AdapterFactory: Send + Sync + 'static {
    type Adapter: Adapter + 'static;

    async fn create_adapter(&self) -> DomainResult<Self::Adapter>;

    /// Whether the adapter writes each added or removed rule through on its own.
    /// When it does not, the whole policy is saved after every mutation.
    fn persists_incrementally(&self) -> bool {
        true
    }
}

/// Process-local policy storage. Every bind starts from an empty policy.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapterFactory;

#[async_trait]
impl AdapterFactory for MemoryAdapterFactory {
    type Adapter = MemoryAdapter;

    async fn create_adapter(&self) -> DomainResult<MemoryAdapter> {
        Ok(MemoryAdapter::default())
    }
}

/// Casbin CSV policy file. The file is created on first bind if it is missing.
#[derive(Debug, Clone)]
pub struct FileAdapterFactory {
    path: PathBuf,
}

impl FileAdapterFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl AdapterFactory for FileAdapterFactory {
    type Adapter = FileAdapter<PathBuf>;

    async fn create_adapter(&self) -> DomainResult<FileAdapter<PathBuf>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open policy file {}", self.path.display()))?;

        Ok(FileAdapter::new(self.path.clone()))
    }

    fn persists_incrementally(&self) -> bool {
        false
    }
}
