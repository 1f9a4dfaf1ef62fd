//! Address → entity resolution over immutable snapshots
//!
//! The resolver owns one `Arc<EntitySnapshot>`. A refresh builds a brand
//! new snapshot off to the side and swaps the reference in a single write;
//! readers clone the `Arc` and keep a consistent view for as long as they
//! hold it. Refresh failures keep the last good snapshot serving.

use super::source::EntitySource;
use crate::error::{SignalError, SignalResult};
use crate::types::{EntityType, KnownEntity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Immutable address → entity mapping
#[derive(Debug, Default)]
pub struct EntitySnapshot {
    version: u64,
    loaded_at: i64,
    entities: HashMap<String, Arc<KnownEntity>>,
    by_address: HashMap<String, Arc<KnownEntity>>,
}

impl EntitySnapshot {
    /// Build a snapshot from a full catalogue
    ///
    /// An address claimed by two entities stays with the first one seen.
    pub fn build(version: u64, entities: Vec<KnownEntity>, loaded_at: i64) -> Self {
        let mut by_id = HashMap::with_capacity(entities.len());
        let mut by_address: HashMap<String, Arc<KnownEntity>> = HashMap::new();

        for entity in entities {
            let entity = Arc::new(entity);
            for address in &entity.addresses {
                match by_address.get(address) {
                    Some(existing) => {
                        log::warn!(
                            "⚠️  Address {} claimed by {} and {}, keeping {}",
                            address,
                            existing.entity_id,
                            entity.entity_id,
                            existing.entity_id
                        );
                    }
                    None => {
                        by_address.insert(address.clone(), Arc::clone(&entity));
                    }
                }
            }
            by_id.insert(entity.entity_id.clone(), entity);
        }

        Self {
            version,
            loaded_at,
            entities: by_id,
            by_address,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> i64 {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Option<&Arc<KnownEntity>> {
        self.by_address.get(address)
    }

    /// Entity owning `address`, if it has the given type
    pub fn lookup_typed(&self, address: &str, entity_type: EntityType) -> Option<&Arc<KnownEntity>> {
        self.lookup(address).filter(|e| e.entity_type == entity_type)
    }

    pub fn entity(&self, entity_id: &str) -> Option<&Arc<KnownEntity>> {
        self.entities.get(entity_id)
    }

    /// All entities of a type, ordered by id
    pub fn entities_of_type(&self, entity_type: EntityType) -> Vec<&Arc<KnownEntity>> {
        let mut out: Vec<_> = self
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .collect();
        out.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        out
    }

    /// Seconds since the snapshot was loaded
    pub fn age_secs(&self, now: i64) -> i64 {
        (now - self.loaded_at).max(0)
    }
}

/// Holder of the active snapshot and its refresh lifecycle
pub struct EntityResolver {
    current: RwLock<Arc<EntitySnapshot>>,
    source: Arc<dyn EntitySource>,
    next_version: AtomicU64,
}

impl EntityResolver {
    /// Start with an empty snapshot (version 0); call `refresh` to load
    pub fn new(source: Arc<dyn EntitySource>) -> Self {
        Self {
            current: RwLock::new(Arc::new(EntitySnapshot::empty())),
            source,
            next_version: AtomicU64::new(1),
        }
    }

    /// Active snapshot; never blocks on an in-flight refresh
    pub fn snapshot(&self) -> Arc<EntitySnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn lookup(&self, address: &str) -> Option<Arc<KnownEntity>> {
        self.snapshot().lookup(address).cloned()
    }

    /// Load a new catalogue and swap it in
    ///
    /// Returns the new snapshot version. On failure the previous snapshot
    /// keeps serving and `EntityResolverStale` is returned.
    pub async fn refresh(&self) -> SignalResult<u64> {
        let entities = match self.source.load_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                let stale = self.snapshot();
                log::warn!(
                    "⚠️  Entity refresh from {} failed, serving snapshot v{} ({} entities): {}",
                    self.source.describe(),
                    stale.version(),
                    stale.len(),
                    e
                );
                return Err(SignalError::EntityResolverStale(e.to_string()));
            }
        };

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(EntitySnapshot::build(
            version,
            entities,
            chrono::Utc::now().timestamp(),
        ));
        let entity_count = snapshot.len();

        {
            let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
            // A slower concurrent refresh must not roll back a newer snapshot
            if guard.version() > version {
                log::debug!("Entity snapshot v{} superseded by v{} before swap", version, guard.version());
                return Ok(guard.version());
            }
            *guard = snapshot;
        }

        log::info!(
            "🏷️  Entity snapshot v{} active ({} entities from {})",
            version,
            entity_count,
            self.source.describe()
        );

        Ok(version)
    }
}

/// Refresh the resolver on a fixed interval until the task is aborted
pub fn spawn_refresh_task(resolver: Arc<EntityResolver>, refresh_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("⏰ Starting entity refresh task (interval: {}s)", refresh_interval.as_secs());

        let mut timer = tokio::time::interval(refresh_interval);
        // First tick fires immediately; the caller already did the initial load
        timer.tick().await;

        loop {
            timer.tick().await;
            if let Err(e) = resolver.refresh().await {
                log::debug!(
                    "Scheduled entity refresh failed, next attempt in {}s: {}",
                    refresh_interval.as_secs(),
                    e
                );
            }
        }
    })
}
