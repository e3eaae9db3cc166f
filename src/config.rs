use crate::core::db::{ConnectionSettings, SslMode};
use crate::core::{Result, YsqlError};
use crate::transfer::RetryPolicy;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
///
/// Every field is optional; anything left out falls back to the local
/// single-node cluster defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub connection: Option<ConnectionConfig>,
    pub transfer: Option<TransferConfig>,
}

/// Connection-related configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// A complete key/value connection string. Individual fields below
    /// override the values it sets.
    pub conninfo: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sslmode: Option<String>,
    pub sslrootcert: Option<PathBuf>,
}

/// Transfer retry configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl Config {
    /// Resolves the connection settings.
    pub fn connection_settings(&self) -> Result<ConnectionSettings> {
        let Some(conn) = &self.connection else {
            return Ok(ConnectionSettings::default());
        };

        let mut settings = match &conn.conninfo {
            Some(conninfo) => ConnectionSettings::from_conninfo(conninfo)?,
            None => ConnectionSettings::default(),
        };
        if let Some(host) = &conn.host {
            settings.host = host.clone();
        }
        if let Some(port) = conn.port {
            settings.port = port;
        }
        if let Some(dbname) = &conn.dbname {
            settings.dbname = dbname.clone();
        }
        if let Some(user) = &conn.user {
            settings.user = user.clone();
        }
        if let Some(password) = &conn.password {
            settings.password = password.clone();
        }
        if let Some(sslmode) = &conn.sslmode {
            settings.sslmode = sslmode.parse::<SslMode>()?;
        }
        if let Some(root_cert) = &conn.sslrootcert {
            settings.sslrootcert = Some(root_cert.clone());
        }
        Ok(settings)
    }

    /// Resolves the transfer retry policy. Without a `[transfer]` table no
    /// retries are made.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let mut policy = RetryPolicy::default();
        if let Some(transfer) = &self.transfer {
            if let Some(max_retries) = transfer.max_retries {
                policy.max_retries = max_retries;
            }
            if let Some(ms) = transfer.initial_backoff_ms {
                policy.initial_backoff = Duration::from_millis(ms);
            }
            if let Some(ms) = transfer.max_backoff_ms {
                policy.max_backoff = Duration::from_millis(ms);
            }
        }
        if policy.initial_backoff > policy.max_backoff {
            return Err(YsqlError::Config(
                "transfer.initial_backoff_ms must not exceed transfer.max_backoff_ms".to_string(),
            ));
        }
        Ok(policy)
    }
}

/// Loads configuration from a TOML file at the given path.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Default configuration file location, e.g.
/// `~/.config/ysql-samples/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ysql-samples").join("config.toml"))
}

/// Loads the configuration for a sample program.
///
/// An explicit path must exist. Without one, the default location is read
/// when present and built-in defaults are used otherwise.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => load_config(path),
        _ => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_CONFIG: &str = r#"
[connection]
conninfo = "host=10.0.0.5 port=5433 dbname=bank user=app password=app"
password = "from-config"
sslmode = "verify-full"
sslrootcert = "/opt/yugabyte/root.crt"

[transfer]
max_retries = 3
initial_backoff_ms = 50
max_backoff_ms = 800
"#;

    #[test]
    fn test_load_config_from_str() {
        let config: Config = toml::from_str(SAMPLE_CONFIG).expect("Failed to parse sample config");

        let settings = config.connection_settings().unwrap();
        assert_eq!(settings.host, "10.0.0.5");
        assert_eq!(settings.dbname, "bank");
        assert_eq!(settings.user, "app");
        assert_eq!(settings.password, "from-config");
        assert_eq!(settings.sslmode, SslMode::VerifyFull);
        assert_eq!(settings.sslrootcert, Some(PathBuf::from("/opt/yugabyte/root.crt")));

        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.max_backoff, Duration::from_millis(800));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.connection_settings().unwrap(), ConnectionSettings::default());
        assert_eq!(config.retry_policy().unwrap().max_retries, 0);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("[connection]\nhots = \"x\"\n").is_err());
    }

    #[test]
    fn test_invalid_backoff_bounds() {
        let config: Config =
            toml::from_str("[transfer]\ninitial_backoff_ms = 500\nmax_backoff_ms = 100\n").unwrap();
        assert!(matches!(config.retry_policy(), Err(YsqlError::Config(_))));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nport = 5544").unwrap();

        let config = resolve_config(Some(file.path())).unwrap();
        assert_eq!(config.connection_settings().unwrap().port, 5544);

        match resolve_config(Some(Path::new("/nonexistent/ysql.toml"))) {
            Err(YsqlError::Io(_)) => {}
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
