use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use casbin::{CoreApi, DefaultModel, Enforcer};
use tokio::sync::{RwLock, RwLockMappedWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::auth::{AdapterFactory, RBAC_MODEL};
use crate::domain::{DomainError, DomainResult};

pub const DEFAULT_POLICY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct LoadState {
    loaded: bool,
    generation: u64,
}

/// Lazily bound, periodically reloaded casbin enforcer.
///
/// Two resources are initialized on demand, each behind its own lock with a
/// double-checked fast path: the adapter binding and the in-memory policy snapshot.
/// Every successful load arms a timer that marks the snapshot stale after `ttl`, so
/// writes made by other processes become visible within that bound. Lock order is
/// binding, then snapshot state, then enforcer.
///
/// A mutation whose save fails leaves rules in memory that the adapter never stored.
/// Such a snapshot is reloaded from the adapter before it serves anything else.
pub struct PolicyCache<F: AdapterFactory> {
    factory: F,
    ttl: Duration,
    bound: RwLock<bool>,
    load_state: Arc<RwLock<LoadState>>,
    // set under the enforcer lock, where load_state cannot be taken
    reload_required: AtomicBool,
    enforcer: RwLock<Option<Enforcer>>,
    shutdown: CancellationToken,
}

impl<F: AdapterFactory> PolicyCache<F> {
    pub fn new(factory: F, ttl: Duration) -> Self {
        Self {
            factory,
            ttl,
            bound: RwLock::new(false),
            load_state: Arc::new(RwLock::new(LoadState::default())),
            reload_required: AtomicBool::new(false),
            enforcer: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_default_ttl(factory: F) -> Self {
        Self::new(factory, DEFAULT_POLICY_TTL)
    }

    /// Binds the adapter and loads the policy if either is missing or stale.
    pub async fn refresh(&self) -> DomainResult<()> {
        self.ensure_bound().await?;
        self.ensure_loaded().await
    }

    /// Fresh enforcer for queries.
    pub async fn read(&self) -> DomainResult<RwLockReadGuard<'_, Enforcer>> {
        self.refresh().await?;
        RwLockReadGuard::try_map(self.enforcer.read().await, Option::as_ref).map_err(|_| {
            DomainError::AuthorizationError("policy store is not bound".to_string())
        })
    }

    /// Fresh enforcer for mutations. Follow every mutation with `persist`.
    pub async fn write(&self) -> DomainResult<RwLockMappedWriteGuard<'_, Enforcer>> {
        self.refresh().await?;
        RwLockWriteGuard::try_map(self.enforcer.write().await, Option::as_mut).map_err(|_| {
            DomainError::AuthorizationError("policy store is not bound".to_string())
        })
    }

    /// Saves the full policy when the bound adapter does not write rules through itself.
    ///
    /// On failure the snapshot is discarded, so the unsaved rules are never enforced.
    pub async fn persist(&self, enforcer: &mut Enforcer) -> DomainResult<()> {
        if self.factory.persists_incrementally() {
            return Ok(());
        }
        if let Err(e) = enforcer.save_policy().await {
            self.reload_required.store(true, Ordering::SeqCst);
            warn!(error = %e, "policy save failed, snapshot will be reloaded");
            return Err(DomainError::AuthorizationError(format!(
                "Failed to save policy: {}",
                e
            )));
        }
        Ok(())
    }

    /// Forces a reload on the next access.
    pub async fn invalidate(&self) {
        self.load_state.write().await.loaded = false;
    }

    /// Drops the current binding. The next access binds a fresh adapter and releases the old one.
    pub async fn rebind(&self) {
        *self.bound.write().await = false;
    }

    pub async fn is_loaded(&self) -> bool {
        self.load_state.read().await.loaded && !self.reload_required.load(Ordering::SeqCst)
    }

    /// Stops the invalidation timer. The snapshot stays as loaded until `invalidate`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[instrument(skip(self))]
    async fn ensure_bound(&self) -> DomainResult<()> {
        if *self.bound.read().await {
            return Ok(());
        }

        let mut bound = self.bound.write().await;
        if *bound {
            return Ok(());
        }

        let adapter = self.factory.create_adapter().await?;
        let model = DefaultModel::from_str(RBAC_MODEL)
            .await
            .map_err(|e| DomainError::AuthorizationError(format!("Failed to load model: {}", e)))?;
        // Enforcer::new loads the policy from the adapter.
        let enforcer = Enforcer::new(model, adapter).await.map_err(|e| {
            DomainError::AuthorizationError(format!("Failed to create enforcer: {}", e))
        })?;

        let mut state = self.load_state.write().await;
        self.reload_required.store(false, Ordering::SeqCst);
        *self.enforcer.write().await = Some(enforcer);
        self.mark_loaded(&mut state);
        *bound = true;

        debug!("policy adapter bound");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_loaded(&self) -> DomainResult<()> {
        if self.is_loaded().await {
            return Ok(());
        }

        let mut state = self.load_state.write().await;
        if state.loaded && !self.reload_required.load(Ordering::SeqCst) {
            return Ok(());
        }

        // cleared before the enforcer lock so a save failing after this load flags again
        self.reload_required.store(false, Ordering::SeqCst);
        {
            let mut guard = self.enforcer.write().await;
            let enforcer = guard.as_mut().ok_or_else(|| {
                DomainError::AuthorizationError("policy store is not bound".to_string())
            })?;
            if let Err(e) = enforcer.load_policy().await {
                self.reload_required.store(true, Ordering::SeqCst);
                return Err(DomainError::AuthorizationError(format!(
                    "Failed to load policies: {}",
                    e
                )));
            }
        }

        self.mark_loaded(&mut state);
        debug!(generation = state.generation, "policy snapshot loaded");
        Ok(())
    }

    fn mark_loaded(&self, state: &mut LoadState) {
        state.loaded = true;
        state.generation += 1;
        self.schedule_expiry(state.generation);
    }

    fn schedule_expiry(&self, generation: u64) {
        let state = Arc::clone(&self.load_state);
        let token = self.shutdown.child_token();
        let ttl = self.ttl;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    let mut state = state.write().await;
                    // a later load owns its own timer
                    if state.generation == generation {
                        state.loaded = false;
                        debug!(generation, "policy snapshot expired");
                    }
                }
            }
        });
    }
}

impl<F: AdapterFactory> Drop for PolicyCache<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
