//! Pool: the single owner of every [`Supervisor`] in the process.
//!
//! On construction it lists every defined network and auto-starts the ones
//! whose config has `AutoStart` set. All further lifecycle operations route
//! through here so "at most one Supervisor per network name" (§3 invariant
//! 5) holds by construction.

use crate::config::DaemonConfig;
use crate::events::Bus;
use crate::store::{validate_network_name, Store};
use crate::supervisor::Supervisor;
use meshd_common::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct Pool {
    store: Store,
    bus: Arc<Bus>,
    engine_binary: PathBuf,
    daemon_config: DaemonConfig,
    supervisors: Mutex<HashMap<String, Arc<Supervisor>>>,
}

impl Pool {
    /// List every network from the store, auto-starting the ones flagged
    /// `AutoStart` in their config.
    pub async fn new(
        store: Store,
        bus: Arc<Bus>,
        engine_binary: PathBuf,
        daemon_config: DaemonConfig,
    ) -> Result<Arc<Self>> {
        let pool = Arc::new(Self {
            store,
            bus,
            engine_binary,
            daemon_config,
            supervisors: Mutex::new(HashMap::new()),
        });

        let networks = pool.store.list()?;
        for net in networks {
            let config = match net.read_config().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(network = net.name(), %e, "failed to read config during pool init, skipping");
                    continue;
                }
            };
            let sup = Arc::new(Supervisor::new(
                net.name().to_string(),
                pool.store.clone(),
                pool.bus.clone(),
                pool.engine_binary.clone(),
                &pool.daemon_config,
            ));
            pool.supervisors
                .lock()
                .await
                .insert(net.name().to_string(), sup.clone());
            if config.auto_start {
                info!(network = net.name(), "auto-starting network");
                sup.start(format!("{}/{}", config.ip, config.mask)).await?;
            }
        }
        Ok(pool)
    }

    /// Fetch the supervisor for `name`; fails `NotDefined` if no such
    /// network has ever been created.
    pub async fn get(&self, name: &str) -> Result<Arc<Supervisor>> {
        self.supervisors
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotDefined(name.to_string()))
    }

    /// Create a supervisor for `name` and configure it with `subnet` the
    /// first time; subsequent calls are a no-op and return the existing
    /// supervisor unchanged (idempotent per §8 property 6).
    pub async fn create(self: &Arc<Self>, name: &str, subnet: &str) -> Result<Arc<Supervisor>> {
        validate_network_name(name)?;
        let mut supervisors = self.supervisors.lock().await;
        if let Some(existing) = supervisors.get(name) {
            return Ok(existing.clone());
        }
        self.store.configure(name, subnet).await?;
        let sup = Arc::new(Supervisor::new(
            name.to_string(),
            self.store.clone(),
            self.bus.clone(),
            self.engine_binary.clone(),
            &self.daemon_config,
        ));
        supervisors.insert(name.to_string(), sup.clone());
        Ok(sup)
    }

    /// Stop and remove `name`, then destroy its on-disk directory.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let sup = {
            let mut supervisors = self.supervisors.lock().await;
            supervisors.remove(name)
        };
        if let Some(sup) = sup {
            sup.stop().await;
        }
        self.store.destroy(name).await
    }

    /// Every supervisor, sorted by name.
    pub async fn nets(&self) -> Vec<Arc<Supervisor>> {
        let supervisors = self.supervisors.lock().await;
        let mut out: Vec<Arc<Supervisor>> = supervisors.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn daemon_config(&self) -> &DaemonConfig {
        &self.daemon_config
    }

    /// Cancel every supervisor in parallel and wait for each to finish.
    pub async fn stop(&self) {
        let supervisors: Vec<Arc<Supervisor>> = self.supervisors.lock().await.values().cloned().collect();
        let stops = supervisors.iter().map(|s| s.stop());
        futures::future::join_all(stops).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn pool(tmp: &TempDir) -> Arc<Pool> {
        let store = Store::new(tmp.path().to_path_buf(), PathBuf::from("/bin/true"));
        store.init().await.unwrap();
        Pool::new(store, Bus::new(), PathBuf::from("/bin/true"), DaemonConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let sup1 = pool.create("office", "10.1.0.0/16").await.unwrap();
        let sup2 = pool.create("office", "10.9.0.0/16").await.unwrap();
        assert!(Arc::ptr_eq(&sup1, &sup2));

        let nets = pool.nets().await;
        assert_eq!(nets.len(), 1);
    }

    #[tokio::test]
    async fn get_fails_for_undefined_network() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let err = pool.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotDefined(_)));
    }

    #[tokio::test]
    async fn remove_destroys_directory() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        pool.create("office", "10.1.0.0/16").await.unwrap();
        let net = pool.store().get("office");
        assert!(net.dir().exists());

        pool.remove("office").await.unwrap();
        assert!(!net.dir().exists());
        assert!(pool.get("office").await.is_err());
    }

    #[tokio::test]
    async fn invalid_name_rejected_on_create() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let err = pool.create("bad name", "10.1.0.0/16").await.unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }
}
