use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant name too long")]
    NameTooLong,
    #[error("empty tenant name")]
    EmptyName,
    #[error("too many tenants")]
    TooMany,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Manages per-tenant engines. Each tenant is one shop floor with its own
/// Engine, WAL and compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Keep only characters that are safe in a file name.
fn sanitize(tenant: &str) -> Result<String, TenantError> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(TenantError::NameTooLong);
    }
    let safe_name: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(TenantError::EmptyName);
    }
    Ok(safe_name)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given tenant. Names that
    /// sanitize to the same file name share one engine.
    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, TenantError> {
        let safe_name = sanitize(tenant)?;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(TenantError::TooMany);
        }

        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path)?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("opened tenant {safe_name}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("opsched_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn operation(id: &str, start: Ms) -> Operation {
        Operation {
            id: id.into(),
            work_order_id: "W1".into(),
            index: 0,
            machine_id: "M1".into(),
            name: "Cut".into(),
            span: Span::new(start, start + HOUR_MS),
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let eng_a = tm.get_or_create("plant_a").unwrap();
        let eng_b = tm.get_or_create("plant_b").unwrap();

        // Same work order and machine ids in both tenants
        for eng in [&eng_a, &eng_b] {
            eng.create_work_order("W1".into(), "Bracket".into(), 1).await.unwrap();
        }
        eng_a.add_operations(vec![operation("O1", 10 * HOUR_MS)]).await.unwrap();

        let window = Span::new(0, 100 * HOUR_MS);
        assert_eq!(eng_a.machine_conflicts("M1", &window, None).await.len(), 1);
        assert!(eng_b.machine_conflicts("M1", &window, None).await.is_empty());
        assert!(eng_b.get_constraints("O1").await.is_err());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        // Path traversal attempt lands inside the data dir
        let evil = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Both spellings map to the same WAL, so they must share one engine
        let plain = tm.get_or_create("evil").unwrap();
        assert!(Arc::ptr_eq(&evil, &plain));

        assert!(matches!(tm.get_or_create("../.."), Err(TenantError::EmptyName)));
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        assert!(matches!(tm.get_or_create(&long_name), Err(TenantError::NameTooLong)));
        assert!(tm.get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN)).is_ok());
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        assert!(matches!(tm.get_or_create("one_more"), Err(TenantError::TooMany)));
        // Existing tenants stay reachable at the limit
        assert!(tm.get_or_create("t0").is_ok());
    }
}
