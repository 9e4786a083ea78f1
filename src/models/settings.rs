use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MaintError, Result};

const MIB: i64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

/// Minimum bloat before a relation is considered worth rebuilding. Both the
/// percentage and the absolute size must be reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BloatThresholds {
    pub min_index_bloat_percent: f64,
    pub min_index_bloat_bytes: i64,
    pub min_table_bloat_percent: f64,
    pub min_table_bloat_bytes: i64,
}

impl Default for BloatThresholds {
    fn default() -> Self {
        BloatThresholds {
            min_index_bloat_percent: 30.0,
            min_index_bloat_bytes: 10 * MIB,
            min_table_bloat_percent: 40.0,
            min_table_bloat_bytes: 10 * MIB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReindexSettings {
    /// Prefix of the replacement index built next to the original.
    pub temp_prefix: String,
    /// Longest identifier the server keeps (NAMEDATALEN - 1).
    pub identifier_max_len: usize,
    /// Lock wait limit for the swap and validation transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
}

impl Default for ReindexSettings {
    fn default() -> Self {
        ReindexSettings {
            temp_prefix: "tmp_".to_string(),
            identifier_max_len: 63,
            lock_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub pool: PoolSettings,
    pub bloat: BloatThresholds,
    pub reindex: ReindexSettings,
}

impl MaintenanceSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: MaintenanceSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let reindex = &self.reindex;
        if reindex.temp_prefix.is_empty() {
            return Err(MaintError::config("reindex.tempPrefix cannot be empty"));
        }
        if reindex.identifier_max_len <= reindex.temp_prefix.len() {
            return Err(MaintError::config(format!(
                "reindex.identifierMaxLen ({}) leaves no room after prefix '{}'",
                reindex.identifier_max_len, reindex.temp_prefix
            )));
        }

        for (name, value) in [
            ("bloat.minIndexBloatPercent", self.bloat.min_index_bloat_percent),
            ("bloat.minTableBloatPercent", self.bloat.min_table_bloat_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(MaintError::config(format!(
                    "{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }

        if self.pool.max_connections == 0 {
            return Err(MaintError::config("pool.maxConnections must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = MaintenanceSettings::from_json(
            r#"{"bloat":{"minIndexBloatPercent":50.0},"reindex":{"lockTimeoutMs":5000}}"#,
        )
        .unwrap();

        assert_eq!(settings.bloat.min_index_bloat_percent, 50.0);
        assert_eq!(settings.bloat.min_index_bloat_bytes, 10 * MIB);
        assert_eq!(settings.reindex.temp_prefix, "tmp_");
        assert_eq!(settings.reindex.identifier_max_len, 63);
        assert_eq!(settings.reindex.lock_timeout_ms, Some(5000));
        assert_eq!(settings.pool.max_connections, 5);
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let err = MaintenanceSettings::from_json(r#"{"reindex":{"tempPrefix":""}}"#).unwrap_err();
        assert!(matches!(err, MaintError::Config(_)));
    }

    #[test]
    fn test_rejects_limit_shorter_than_prefix() {
        let err =
            MaintenanceSettings::from_json(r#"{"reindex":{"identifierMaxLen":4}}"#).unwrap_err();
        assert!(err.to_string().contains("identifierMaxLen"));
    }

    #[test]
    fn test_rejects_percent_out_of_range() {
        let err = MaintenanceSettings::from_json(r#"{"bloat":{"minTableBloatPercent":140}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("minTableBloatPercent"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = MaintenanceSettings::load(Path::new("/nonexistent/maint.json")).unwrap_err();
        assert!(matches!(err, MaintError::Io(_)));
    }
}
