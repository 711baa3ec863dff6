//! Narrow persistence collaborator. Concrete storage (files here, NVS on the
//! original firmware) is kept behind this trait so the engine itself never
//! touches a filesystem path directly.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Namespaced blob/scalar key-value store, mirroring the original firmware's
/// NVS namespaces (`modbus_cfg`, `mqtt_config`, `tcp_slave`, `uart_params`).
/// Absence of a key is not an error: callers fall back to field defaults,
/// the same tolerance `load_*_from_nvs` has in the source firmware.
pub trait KvStore: Send + Sync {
    fn load_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn save_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    fn load_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        match self.load_blob(namespace, key)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("decoding stored value")?,
            )),
            None => Ok(None),
        }
    }

    fn save_json<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).context("encoding value for storage")?;
        self.save_blob(namespace, key, &bytes)
    }
}

/// One JSON file per namespace under `base_dir`, loaded into memory and
/// rewritten wholesale on save. Grounded on `core::persistence`'s
/// file-per-config JSON pattern, generalized from a single fixed file to
/// one file per namespace so `modbus_cfg`/`mqtt_config`/`tcp_slave`/
/// `uart_params` don't clobber each other.
pub struct JsonFileKvStore {
    base_dir: PathBuf,
    cache: Mutex<HashMap<String, HashMap<String, serde_json::Value>>>,
}

impl JsonFileKvStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("creating kv store directory {}", base_dir.display()))?;
        Ok(Self {
            base_dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.base_dir.join(format!("{namespace}.json"))
    }

    fn load_namespace(&self, namespace: &str) -> Result<HashMap<String, serde_json::Value>> {
        let path = self.namespace_path(namespace);
        if !Path::new(&path).exists() {
            return Ok(HashMap::new());
        }
        let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    }
}

impl KvStore for JsonFileKvStore {
    fn load_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cache = self.cache.lock().expect("kv store cache poisoned");
        if !cache.contains_key(namespace) {
            cache.insert(namespace.to_string(), self.load_namespace(namespace)?);
        }
        let table = cache.get(namespace).expect("namespace just inserted");
        Ok(match table.get(key) {
            Some(value) => Some(serde_json::to_vec(value).context("re-encoding cached value")?),
            None => None,
        })
    }

    fn save_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let parsed: serde_json::Value =
            serde_json::from_slice(value).context("decoding value to store")?;
        let mut cache = self.cache.lock().expect("kv store cache poisoned");
        let table = cache
            .entry(namespace.to_string())
            .or_insert_with(HashMap::new);
        table.insert(key.to_string(), parsed);

        let path = self.namespace_path(namespace);
        let bytes = serde_json::to_vec_pretty(table).context("encoding namespace for write")?;
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value_through_a_fresh_namespace() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("kv_store_test_{}", std::process::id()));
        let store = JsonFileKvStore::new(&dir)?;
        store.save_json("modbus_cfg", "poll_interval_ms", &1000u32)?;
        let loaded: Option<u32> = store.load_json("modbus_cfg", "poll_interval_ms")?;
        assert_eq!(loaded, Some(1000));
        let missing: Option<u32> = store.load_json("modbus_cfg", "does_not_exist")?;
        assert_eq!(missing, None);
        fs::remove_dir_all(&dir).ok();
        Ok(())
    }
}
