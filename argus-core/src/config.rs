//! Service configuration.
//!
//! Loaded from a TOML file with `#[serde(default)]` everywhere so a minimal
//! config stays minimal. Basic-auth credentials can be overridden through
//! `ARGUS_AUTH_USER` / `ARGUS_AUTH_PASSWORD` so they never have to live in
//! the file. Clusters listed in the file become permanent: they are never
//! evicted for inactivity.
//!
//! ```toml
//! [service]
//! bind = "0.0.0.0:8081"
//! static_path = "/opt/argus/static"
//! update_interval = 5
//! inactive_dur_before_removal = 1800
//!
//! [mailer]
//! host = "smtp.example.com"
//! port = 587
//! from = "argus@example.com"
//! send_to = ["oncall@example.com"]
//!
//! [[cluster]]
//! host = "10.0.0.1"
//! port = 3000
//! alias = "prod"
//! ```

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ArgusError, ArgusResult};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub basic_auth: BasicAuthConfig,
    pub mailer: MailerConfig,
    pub backup: BackupConfig,
    #[serde(rename = "cluster")]
    pub clusters: Vec<ClusterSeedConfig>,
}

/// Core service knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Default per-cluster refresh interval in seconds.
    pub update_interval: u64,
    /// Seconds of session inactivity before a non-permanent cluster is
    /// evicted; zero or negative disables eviction.
    pub inactive_dur_before_removal: i64,
    /// Scheduler tick in seconds.
    pub scheduler_tick: u64,
    /// Per-call info request timeout in seconds.
    pub info_timeout: u64,
    /// Directory of UI assets served at `/`.
    pub static_path: String,
    /// HTTP bind address.
    pub bind: String,
    /// TLS certificate path; HTTPS is enabled when both files are set.
    pub cert_file: String,
    pub key_file: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            update_interval: 5,
            inactive_dur_before_removal: 0,
            scheduler_tick: 1,
            info_timeout: 10,
            static_path: String::new(),
            bind: "127.0.0.1:8081".to_owned(),
            cert_file: String::new(),
            key_file: String::new(),
        }
    }
}

/// Optional HTTP basic auth in front of the whole API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicAuthConfig {
    pub user: String,
    pub password: String,
}

impl BasicAuthConfig {
    pub fn is_enabled(&self) -> bool {
        !self.user.is_empty()
    }
}

/// Outbound alert mail settings. Delivery is skipped entirely when `host` is
/// empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
    pub send_to: Vec<String>,
    /// Optional HTML template file; falls back to the built-in template.
    pub template_path: String,
    pub accept_invalid_cert: bool,
}

impl Default for MailerConfig {
    fn default() -> Self {
        MailerConfig {
            host: String::new(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from: String::new(),
            send_to: Vec::new(),
            template_path: String::new(),
            accept_invalid_cert: false,
        }
    }
}

/// Backup/restore execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding the transfer ledger.
    pub data_dir: String,
    /// Command template for backups; `{namespace}`, `{destination_address}`,
    /// `{destination_path}`, `{sets}` are substituted.
    pub backup_command: String,
    /// Command template for restores.
    pub restore_command: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            data_dir: ".".to_owned(),
            backup_command: String::new(),
            restore_command: String::new(),
        }
    }
}

/// One cluster seeded from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSeedConfig {
    pub host: String,
    pub port: u16,
    pub alias: String,
    pub user: String,
    pub password: String,
}

impl Config {
    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> ArgusResult<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ArgusError::io(format!("read config {}", path.display()), err))?;
        let mut config: Config = toml::from_str(&raw).map_err(|err| ArgusError::Config {
            message: format!("invalid config {}: {}", path.display(), err),
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment wins over the file for credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(user) = env::var("ARGUS_AUTH_USER") {
            if !user.is_empty() {
                self.basic_auth.user = user;
            }
        }
        if let Ok(password) = env::var("ARGUS_AUTH_PASSWORD") {
            if !password.is_empty() {
                self.basic_auth.password = password;
            }
        }
    }

    /// Startup validation; failures here are fatal for the process.
    pub fn validate(&self) -> ArgusResult<()> {
        if self.service.static_path.is_empty() {
            return Err(ArgusError::Config {
                message: "service.static_path is not set".into(),
            });
        }
        if !Path::new(&self.service.static_path).is_dir() {
            return Err(ArgusError::Config {
                message: format!(
                    "service.static_path '{}' is not a directory",
                    self.service.static_path
                ),
            });
        }
        if self.service.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ArgusError::Config {
                message: format!("service.bind '{}' is not a valid address", self.service.bind),
            });
        }
        if self.service.cert_file.is_empty() != self.service.key_file.is_empty() {
            return Err(ArgusError::Config {
                message: "cert_file and key_file must be set together".into(),
            });
        }
        for cluster in &self.clusters {
            if cluster.host.is_empty() || cluster.port == 0 {
                return Err(ArgusError::Config {
                    message: "every [[cluster]] entry needs host and port".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.service.update_interval, 5);
        assert_eq!(config.service.bind, "127.0.0.1:8081");
        assert!(!config.basic_auth.is_enabled());
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn cluster_seeds_parse() {
        let config: Config = toml::from_str(
            r#"
            [service]
            update_interval = 10

            [[cluster]]
            host = "10.0.0.1"
            port = 3000
            alias = "prod"

            [[cluster]]
            host = "10.0.0.2"
            port = 3000
            "#,
        )
        .unwrap();
        assert_eq!(config.service.update_interval, 10);
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.clusters[0].alias, "prod");
    }

    #[test]
    fn validate_requires_static_path() {
        let config: Config = toml::from_str("").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ArgusError::Config { .. })
        ));
    }

    #[test]
    fn load_applies_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("argus.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[basic_auth]\nuser = \"file-user\"").unwrap();

        env::set_var("ARGUS_AUTH_USER", "env-user");
        let config = Config::load(&path).unwrap();
        env::remove_var("ARGUS_AUTH_USER");

        assert_eq!(config.basic_auth.user, "env-user");
    }
}
