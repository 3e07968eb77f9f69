use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::{MAX_TENANTS, MAX_TENANT_NAME_LEN};
use crate::notify::NotifyHub;

/// Lazily materializes one engine per tenant. The tenant key is the
/// `database` parameter of the pgwire connection; each engine gets its own
/// WAL file and its own background compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Reduce a tenant name to a filesystem-safe WAL file stem. Anything that
/// could escape the data directory is stripped rather than rejected, so
/// `../evil` and `evil` collapse to the same store.
fn file_stem(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("tenant name exceeds {MAX_TENANT_NAME_LEN} bytes"),
        ));
    }
    let stem: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    if stem.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "tenant name has no usable characters",
        ));
    }
    Ok(stem)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Return the tenant's engine, booting it from its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(existing) = self.engines.get(tenant) {
            return Ok(existing.value().clone());
        }

        let stem = file_stem(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("tenant limit reached"));
        }

        let engine = Arc::new(Engine::new(
            self.data_dir.join(format!("{stem}.wal")),
            Arc::new(NotifyHub::new()),
        )?);

        let worker = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(compactor::run_compactor(worker, threshold));

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
