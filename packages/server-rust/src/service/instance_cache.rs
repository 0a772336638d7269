//! Per-configuration cache of backend connections.
//!
//! Entries are keyed by [`ConfigFingerprint`] and never evicted. Each entry is
//! a `OnceCell`, so concurrent first requests for the same fingerprint share a
//! single construction. A failed construction leaves nothing behind: the empty
//! slot is dropped once no other caller is waiting on it.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use runboard_core::World;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::config::{resolve_backend, AmbientConfig, ConfigFingerprint, ResolvedConfig};
use super::operation::OperationError;
use crate::storage::factory::BackendRegistry;

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// A constructed backend connection together with the configuration it was
/// built from.
pub struct ConnectionHandle {
    pub fingerprint: ConfigFingerprint,
    pub backend: String,
    pub created_at: SystemTime,
    world: Arc<dyn World>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn world(&self) -> &Arc<dyn World> {
        &self.world
    }
}

impl Deref for ConnectionHandle {
    type Target = dyn World;

    fn deref(&self) -> &Self::Target {
        self.world.as_ref()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("fingerprint", &self.fingerprint.digest())
            .field("backend", &self.backend)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// InstanceCache
// ---------------------------------------------------------------------------

type Slot = Arc<OnceCell<Arc<ConnectionHandle>>>;

/// Cache of live connections, one per distinct effective configuration.
pub struct InstanceCache {
    entries: DashMap<ConfigFingerprint, Slot>,
    registry: Arc<BackendRegistry>,
    ambient: Arc<AmbientConfig>,
    default_backend: String,
}

impl InstanceCache {
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        ambient: Arc<AmbientConfig>,
        default_backend: impl Into<String>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            registry,
            ambient,
            default_backend: default_backend.into(),
        }
    }

    /// Return the connection for `resolved`, constructing it on first use.
    ///
    /// The first connection constructed while the process-wide configuration
    /// is empty publishes its settings there, so the scheduling layer sees
    /// them too.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::UnknownBackend` when no factory serves the
    /// selected backend kind, or the factory's own failure. Neither is cached.
    pub async fn get_or_create(
        &self,
        resolved: &ResolvedConfig,
    ) -> Result<Arc<ConnectionHandle>, OperationError> {
        // Clone the slot out so no map guard is held across the await below.
        let slot: Slot = Arc::clone(&self.entries.entry(resolved.fingerprint.clone()).or_default());

        if let Some(handle) = slot.get() {
            metrics::counter!("runboard_instance_cache_total", "result" => "hit").increment(1);
            debug!(fingerprint = %resolved.fingerprint.digest(), "instance cache hit");
            return Ok(Arc::clone(handle));
        }
        metrics::counter!("runboard_instance_cache_total", "result" => "miss").increment(1);

        match slot.get_or_try_init(|| self.construct(resolved)).await {
            Ok(handle) => Ok(Arc::clone(handle)),
            Err(err) => {
                // Two references: the map's and ours. More means another
                // caller is still waiting on this slot and will retry it.
                self.entries.remove_if(&resolved.fingerprint, |_, s| {
                    !s.initialized() && Arc::strong_count(s) <= 2
                });
                Err(err)
            }
        }
    }

    /// The cached connection for `fingerprint`, if one has been constructed.
    #[must_use]
    pub fn get(&self, fingerprint: &ConfigFingerprint) -> Option<Arc<ConnectionHandle>> {
        self.entries
            .get(fingerprint)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of constructed connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    /// `true` when no connection has been constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, including ones still under construction.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    async fn construct(
        &self,
        resolved: &ResolvedConfig,
    ) -> Result<Arc<ConnectionHandle>, OperationError> {
        let kind = resolve_backend(&resolved.settings, &self.default_backend).to_string();
        let factory = self
            .registry
            .get(&kind)
            .ok_or_else(|| OperationError::UnknownBackend { kind: kind.clone() })?;
        let world = factory.create(&resolved.settings).await?;
        if self.ambient.publish_if_empty(&resolved.settings) {
            info!(
                fingerprint = %resolved.fingerprint.digest(),
                "connection settings published process-wide"
            );
        }

        metrics::counter!("runboard_instance_cache_total", "result" => "constructed").increment(1);
        info!(
            fingerprint = %resolved.fingerprint.digest(),
            backend = %kind,
            "backend connection constructed"
        );

        Ok(Arc::new(ConnectionHandle {
            fingerprint: resolved.fingerprint.clone(),
            backend: kind,
            created_at: SystemTime::now(),
            world,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use runboard_core::StoreError;

    use super::*;
    use crate::service::config::{ConfigResolver, Settings, CONNECTION_URL, DATA_DIR, TARGET_WORLD};
    use crate::storage::factory::WorldFactory;
    use crate::storage::memory::{MemoryWorld, MemoryWorldFactory};

    /// Memory factory that takes a while to connect.
    struct SlowFactory {
        inner: MemoryWorldFactory,
    }

    #[async_trait]
    impl WorldFactory for SlowFactory {
        fn kind(&self) -> &'static str {
            "memory"
        }

        async fn create(&self, settings: &Settings) -> Result<Arc<dyn World>, StoreError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.create(settings).await
        }
    }

    /// Fails the first connection attempt, then succeeds.
    struct FlakyFactory {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl WorldFactory for FlakyFactory {
        fn kind(&self) -> &'static str {
            "postgres"
        }

        async fn create(&self, _settings: &Settings) -> Result<Arc<dyn World>, StoreError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Unavailable("connect ECONNREFUSED".to_string()));
            }
            Ok(Arc::new(MemoryWorld::new()))
        }
    }

    fn cache_with(registry: BackendRegistry) -> (InstanceCache, ConfigResolver) {
        let ambient = Arc::new(AmbientConfig::default());
        let cache = InstanceCache::new(Arc::new(registry), Arc::clone(&ambient), "memory");
        (cache, ConfigResolver::new(ambient))
    }

    #[tokio::test]
    async fn concurrent_first_requests_construct_once() {
        let inner = MemoryWorldFactory::new();
        let counter = inner.construction_counter();
        let mut registry = BackendRegistry::new();
        registry.register(SlowFactory { inner });
        let (cache, resolver) = cache_with(registry);
        let cache = Arc::new(cache);
        let resolved = resolver.resolve(&Settings::new());

        let calls = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            let resolved = resolved.clone();
            tokio::spawn(async move { cache.get_or_create(&resolved).await.unwrap() })
        });
        let handles: Vec<Arc<ConnectionHandle>> = futures_util::future::join_all(calls)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_configurations_get_distinct_connections() {
        let mut registry = BackendRegistry::new();
        registry.register(MemoryWorldFactory::new());
        let (cache, _) = cache_with(registry);

        let a = ResolvedConfig {
            fingerprint: ConfigFingerprint::of(&Settings::new().with(CONNECTION_URL, "a")),
            settings: Settings::new().with(CONNECTION_URL, "a"),
        };
        let b = ResolvedConfig {
            fingerprint: ConfigFingerprint::of(&Settings::new().with(CONNECTION_URL, "b")),
            settings: Settings::new().with(CONNECTION_URL, "b"),
        };
        let ha = cache.get_or_create(&a).await.unwrap();
        let hb = cache.get_or_create(&b).await.unwrap();
        assert!(!Arc::ptr_eq(&ha, &hb));
        assert!(Arc::ptr_eq(&ha, &cache.get(&a.fingerprint).unwrap()));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failed_construction_is_not_cached() {
        let mut registry = BackendRegistry::new();
        registry.register(FlakyFactory {
            attempts: AtomicUsize::new(0),
        });
        let (cache, resolver) = cache_with(registry);
        let settings = Settings::new().with(TARGET_WORLD, "postgres");
        let resolved = resolver.resolve(&settings);

        let err = cache.get_or_create(&resolved).await.unwrap_err();
        assert!(matches!(err, OperationError::Store(StoreError::Unavailable(_))));
        assert!(cache.get(&resolved.fingerprint).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.slot_count(), 0);

        let handle = cache.get_or_create(&resolved).await.unwrap();
        assert_eq!(handle.backend, "postgres");
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let (cache, resolver) = cache_with(BackendRegistry::new());
        let resolved = resolver.resolve(&Settings::new().with(TARGET_WORLD, "sqlite"));
        let err = cache.get_or_create(&resolved).await.unwrap_err();
        assert!(matches!(err, OperationError::UnknownBackend { kind } if kind == "sqlite"));
        // A rejected override does not become process-wide.
        assert!(resolver.ambient().is_empty());
    }

    #[tokio::test]
    async fn construction_publishes_settings_process_wide() {
        let mut registry = BackendRegistry::new();
        registry.register(MemoryWorldFactory::new());
        let (cache, resolver) = cache_with(registry);
        let settings = Settings::new().with(CONNECTION_URL, "memory://one");

        let resolved = resolver.resolve(&settings);
        cache.get_or_create(&resolved).await.unwrap();
        assert_eq!(
            resolver.ambient().snapshot().get(CONNECTION_URL),
            Some("memory://one")
        );

        // Process-wide settings now win over any later override.
        let later = resolver.resolve(&Settings::new().with(CONNECTION_URL, "memory://two"));
        assert_eq!(later.fingerprint, resolved.fingerprint);
    }

    #[tokio::test]
    async fn failing_overrides_do_not_accumulate_slots() {
        let (cache, resolver) = cache_with(BackendRegistry::new());
        for i in 0..16 {
            let settings = Settings::new()
                .with(TARGET_WORLD, "sqlite")
                .with(CONNECTION_URL, format!("file:///tmp/{i}.db"));
            assert!(cache.get_or_create(&resolver.resolve(&settings)).await.is_err());
        }
        assert_eq!(cache.slot_count(), 0);
    }

    #[tokio::test]
    async fn second_configuration_does_not_merge_into_process_wide() {
        let mut registry = BackendRegistry::new();
        registry.register(MemoryWorldFactory::new());
        let ambient = Arc::new(AmbientConfig::default());
        let cache = InstanceCache::new(Arc::new(registry), Arc::clone(&ambient), "memory");

        let a = Settings::new().with(CONNECTION_URL, "memory://a");
        let b = Settings::new().with(DATA_DIR, "/tmp/wf");
        for settings in [&a, &b] {
            let resolved = ResolvedConfig {
                fingerprint: ConfigFingerprint::of(settings),
                settings: settings.clone(),
            };
            cache.get_or_create(&resolved).await.unwrap();
        }
        assert_eq!(ambient.snapshot(), a);
    }

    #[test]
    fn debug_shows_digest_only() {
        let settings = Settings::new().with(CONNECTION_URL, "postgres://u:secret@db/x");
        let handle = ConnectionHandle {
            fingerprint: ConfigFingerprint::of(&settings),
            backend: "memory".to_string(),
            created_at: SystemTime::now(),
            world: Arc::new(MemoryWorld::new()),
        };
        let text = format!("{handle:?}");
        assert!(!text.contains("secret"));
        assert!(text.contains(&handle.fingerprint.digest()));
    }
}
