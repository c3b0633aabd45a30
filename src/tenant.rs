use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Manages per-tenant engines. Each tenant gets its own Engine, WAL file and compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    /// Serialises tenant creation. Lookups of loaded tenants never take it.
    create_lock: Mutex<()>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            create_lock: Mutex::new(()),
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        // Keep the WAL inside data_dir.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // WAL replay runs under the creation lock only, so no map shard is
        // held while the log is read.
        let _creating = self
            .create_lock
            .lock()
            .map_err(|_| std::io::Error::other("tenant creation lock poisoned"))?;
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path)?);
        self.engines.insert(tenant.to_string(), engine.clone());

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("loaded tenant {safe_name}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
