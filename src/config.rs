use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogKind;
use crate::error::SyncError;
use crate::pending::PendingKind;

/// Top-level settings, usually read from a JSON file shipped with the app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("field-sync.db"),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(SyncError::Config("database_path is empty".into()));
        }
        self.gateway.validate()
    }
}

/// Where and how the remote API is reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// JSON field holding the server id of a catalog row.
    pub catalog_id_field: String,
    /// Overrides keyed by catalog slug, e.g. `"articulos": "inventory/articles"`.
    pub catalog_paths: HashMap<String, String>,
    /// Overrides keyed by record kind slug.
    pub submit_paths: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_secs: 30,
            catalog_id_field: "Id".to_string(),
            catalog_paths: HashMap::new(),
            submit_paths: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url is empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(SyncError::Config("timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn catalog_url(&self, kind: CatalogKind) -> String {
        let path = self
            .catalog_paths
            .get(kind.slug())
            .cloned()
            .unwrap_or_else(|| format!("catalogs/{}", kind.slug()));
        self.join(&path)
    }

    pub fn submit_url(&self, kind: PendingKind) -> String {
        self.join(&self.submit_path(kind))
    }

    pub fn batch_url(&self, kind: PendingKind) -> String {
        self.join(&format!("{}/batch", self.submit_path(kind)))
    }

    fn submit_path(&self, kind: PendingKind) -> String {
        self.submit_paths
            .get(kind.slug())
            .cloned()
            .unwrap_or_else(|| format!("records/{}", kind.slug()))
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = Config::from_json(r#"{"gateway": {"base_url": "https://agro.example/api/"}}"#)
            .unwrap();
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(
            config.gateway.catalog_url(CatalogKind::Campos),
            "https://agro.example/api/catalogs/campos"
        );
        assert_eq!(
            config.gateway.batch_url(PendingKind::RatTrap),
            "https://agro.example/api/records/rat_trap/batch"
        );
    }

    #[test]
    fn overrides_win() {
        let mut gateway = GatewayConfig::default();
        gateway
            .submit_paths
            .insert("voucher".into(), "/salidas".into());
        assert_eq!(
            gateway.submit_url(PendingKind::Voucher),
            "http://localhost:8080/api/salidas"
        );
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = Config::from_json(r#"{"gateway": {"timeout_secs": 0}}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
