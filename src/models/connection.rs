use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disable => write!(f, "disable"),
            SslMode::Prefer => write!(f, "prefer"),
            SslMode::Require => write!(f, "require"),
        }
    }
}

/// Where the maintenance job connects. The account needs ownership of the
/// tables it reindexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
}

fn default_port() -> u16 {
    5432
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"host":"db1","database":"metadata","username":"awips"}"#,
        )
        .unwrap();

        assert_eq!(config.port, 5432);
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert!(config.password.is_empty());
    }

    #[test]
    fn test_password_not_serialized_when_empty() {
        let config = ConnectionConfig {
            host: "localhost".into(),
            port: 5432,
            database: "metadata".into(),
            username: "awips".into(),
            password: String::new(),
            ssl_mode: SslMode::Require,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("password"));
        assert!(json.contains("\"sslMode\":\"require\""));
    }
}
