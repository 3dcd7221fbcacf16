use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use super::order::Order;
use crate::error::FetchError;
use crate::product::ProductInfo;

/// Archive-backed store that must stage a product before it can be served.
/// Implemented out of scope by queue- or object-storage-backed collaborators.
#[async_trait]
pub trait AsyncDataStore: Send + Sync {
    fn name(&self) -> &str;

    /// Request staging of a product; returns the job handle.
    async fn fetch(&self, product: &ProductInfo) -> anyhow::Result<Order>;

    /// Current state of the job for a product, if any.
    async fn get_order(&self, product_uuid: Uuid) -> Option<Order>;

    /// Existing order lookup used for idempotent re-fetches; logs the hit
    /// on the store side.
    async fn get_and_log_existing_order(
        &self,
        product_uuid: Uuid,
        local_id: &str,
        size: u64,
    ) -> Option<Order>;
}

/// Bookkeeping record capping concurrent per-user fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaEntry {
    pub store_name: String,
    pub limiter_name: String,
    pub user_id: String,
    pub resource_key: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Storage for quota entries, scoped by `(store, limiter, user)`.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn entries(&self, store: &str, limiter: &str, user: &str) -> Vec<QuotaEntry>;
    async fn insert(&self, entry: QuotaEntry);
    async fn remove(&self, store: &str, limiter: &str, user: &str, resource_key: Uuid);
}

/// In-memory ledger; the production system persists entries next to the
/// order queue, behind the same trait.
#[derive(Default)]
pub struct InMemoryQuotaLedger {
    entries: tokio::sync::Mutex<Vec<QuotaEntry>>,
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn entries(&self, store: &str, limiter: &str, user: &str) -> Vec<QuotaEntry> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|e| e.store_name == store && e.limiter_name == limiter && e.user_id == user)
            .cloned()
            .collect()
    }

    async fn insert(&self, entry: QuotaEntry) {
        let mut entries = self.entries.lock().await;
        entries.push(entry);
    }

    async fn remove(&self, store: &str, limiter: &str, user: &str, resource_key: Uuid) {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| {
            !(e.store_name == store
                && e.limiter_name == limiter
                && e.user_id == user
                && e.resource_key == resource_key)
        });
    }
}

/// Decorator in front of an [`AsyncDataStore`] capping concurrent
/// outstanding fetch requests per user.
///
/// The garbage-collect, check and perform steps run as one logical
/// transaction under a per-user critical section: a failed store call never
/// leaves a quota entry behind, a successful one leaves exactly one.
/// Unrelated users' fetches proceed fully in parallel.
pub struct FetchQuotaGate {
    store: Arc<dyn AsyncDataStore>,
    ledger: Arc<dyn QuotaLedger>,
    limiter_name: String,
    max_fetches_in_parallel: usize,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FetchQuotaGate {
    pub fn new(
        store: Arc<dyn AsyncDataStore>,
        ledger: Arc<dyn QuotaLedger>,
        limiter_name: impl Into<String>,
        max_fetches_in_parallel: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            limiter_name: limiter_name.into(),
            max_fetches_in_parallel: max_fetches_in_parallel.max(1),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Request staging of `product` on behalf of `user`.
    ///
    /// A re-fetch of a resource with a non-terminal order returns that order
    /// unchanged and consumes no quota slot.
    pub async fn fetch(
        &self,
        user: Option<&str>,
        product: &ProductInfo,
    ) -> Result<Order, FetchError> {
        let user = user.ok_or(FetchError::NoUserContext)?;

        if let Some(existing) = self
            .store
            .get_and_log_existing_order(product.uuid, &product.filename, product.declared_size)
            .await
        {
            if !existing.is_terminal() {
                debug!(
                    "reusing running order {} for {} (user {user})",
                    existing.job_id, product.uuid
                );
                return Ok(existing);
            }
        }

        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        self.collect_stale_entries(user).await;

        let live = self
            .ledger
            .entries(self.store.name(), &self.limiter_name, user)
            .await
            .len();
        if live >= self.max_fetches_in_parallel {
            info!(
                "quota reached for user {user} on store {} ({live}/{})",
                self.store.name(),
                self.max_fetches_in_parallel
            );
            return Err(FetchError::QuotaExceeded {
                max: self.max_fetches_in_parallel,
                resource: product.filename.clone(),
            });
        }

        let order = self
            .store
            .fetch(product)
            .await
            .map_err(FetchError::UnderlyingStoreFailure)?;

        self.ledger
            .insert(QuotaEntry {
                store_name: self.store.name().to_string(),
                limiter_name: self.limiter_name.clone(),
                user_id: user.to_string(),
                resource_key: product.uuid,
                created_at: Utc::now(),
            })
            .await;
        Ok(order)
    }

    pub async fn get_order(&self, product_uuid: Uuid) -> Option<Order> {
        self.store.get_order(product_uuid).await
    }

    /// Drop entries whose order is terminal or absent.
    async fn collect_stale_entries(&self, user: &str) {
        let entries = self
            .ledger
            .entries(self.store.name(), &self.limiter_name, user)
            .await;
        for entry in entries {
            let live = match self.store.get_order(entry.resource_key).await {
                Some(order) => !order.is_terminal(),
                None => false,
            };
            if !live {
                debug!(
                    "collecting stale quota entry for user {user}, resource {}",
                    entry.resource_key
                );
                self.ledger
                    .remove(
                        &entry.store_name,
                        &entry.limiter_name,
                        &entry.user_id,
                        entry.resource_key,
                    )
                    .await;
            }
        }
    }

    /// Lock for one user's critical section. Locks nobody holds any more
    /// are pruned on each lookup, so the map stays bounded by the number of
    /// users with a fetch in flight.
    fn user_lock(&self, user: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
