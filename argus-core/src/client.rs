//! The database driver contract.
//!
//! The engine never talks to the database directly; it consumes these traits.
//! Any driver that can enumerate cluster nodes, answer textual info requests,
//! and perform the admin RPCs satisfies the contract. The bundled
//! [`crate::driver`] implements the monitoring half over the plain-text info
//! port; tests use the scriptable mock in [`crate::test_helpers`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ArgusError, ArgusResult};

/// A `host:port` pair identifying one database node endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HostAddr {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAddr {
    type Err = ArgusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ArgusError::validation(format!("invalid address '{}', expected host:port", s))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ArgusError::validation(format!("invalid port in address '{}'", s)))?;
        if host.is_empty() {
            return Err(ArgusError::validation(format!(
                "invalid address '{}', empty host",
                s
            )));
        }
        Ok(HostAddr::new(host, port))
    }
}

/// A user and the roles granted to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoles {
    pub user: String,
    pub roles: Vec<String>,
}

/// A single privilege grant: a permission code, optionally scoped to a
/// namespace and set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub code: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub set_name: String,
}

/// A role and its privileges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub privileges: Vec<Privilege>,
}

/// Secondary index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexType {
    Numeric,
    String,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Numeric => "NUMERIC",
            IndexType::String => "STRING",
        }
    }
}

impl FromStr for IndexType {
    type Err = ArgusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NUMERIC" => Ok(IndexType::Numeric),
            "STRING" => Ok(IndexType::String),
            other => Err(ArgusError::validation(format!(
                "unknown index type '{}'",
                other
            ))),
        }
    }
}

/// One node handle owned by the driver. `request_info` is the workhorse: a
/// batch of textual commands answered in one round trip.
#[async_trait]
pub trait DatabaseNode: Send + Sync {
    /// The address this handle talks to.
    fn host(&self) -> HostAddr;

    /// The node id reported by the server, when known.
    fn name(&self) -> String;

    /// Issue a batch of info commands. The result maps each command to its
    /// raw response text.
    async fn request_info(
        &self,
        timeout: Duration,
        commands: &[&str],
    ) -> ArgusResult<HashMap<String, String>>;

    /// Release the handle's resources. Idempotent.
    fn close(&self);
}

/// The cluster-wide driver handle owned by one monitored cluster.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// The node handles the driver currently knows about.
    fn nodes(&self) -> Vec<Arc<dyn DatabaseNode>>;

    /// Whether the driver still has at least one live connection.
    fn is_connected(&self) -> bool;

    /// Add seed addresses so the driver can rediscover the cluster even if
    /// every known node drops out.
    fn add_seeds(&self, seeds: Vec<HostAddr>);

    /// Tear down all connections. Idempotent.
    fn close(&self);

    async fn change_password(&self, user: &str, password: &str) -> ArgusResult<()>;
    async fn query_user(&self, user: &str) -> ArgusResult<UserRoles>;
    async fn query_users(&self) -> ArgusResult<Vec<UserRoles>>;
    async fn query_role(&self, name: &str) -> ArgusResult<Role>;
    async fn query_roles(&self) -> ArgusResult<Vec<Role>>;
    async fn create_user(&self, user: &str, password: &str, roles: &[String]) -> ArgusResult<()>;
    async fn drop_user(&self, user: &str) -> ArgusResult<()>;
    async fn grant_roles(&self, user: &str, roles: &[String]) -> ArgusResult<()>;
    async fn revoke_roles(&self, user: &str, roles: &[String]) -> ArgusResult<()>;
    async fn create_role(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()>;
    async fn drop_role(&self, role: &str) -> ArgusResult<()>;
    async fn grant_privileges(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()>;
    async fn revoke_privileges(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()>;
    async fn create_index(
        &self,
        namespace: &str,
        set_name: &str,
        index_name: &str,
        bin_name: &str,
        index_type: IndexType,
    ) -> ArgusResult<()>;
    async fn drop_index(&self, namespace: &str, set_name: &str, index_name: &str)
        -> ArgusResult<()>;
    async fn register_udf(&self, name: &str, body: &[u8]) -> ArgusResult<()>;
    async fn remove_udf(&self, name: &str) -> ArgusResult<()>;
}

/// Builds driver handles for newly registered clusters.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        seeds: &[HostAddr],
        user: Option<&str>,
        password: Option<&str>,
    ) -> ArgusResult<Arc<dyn DatabaseClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_addr_parses() {
        let addr: HostAddr = "10.0.0.1:3000".parse().unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 3000);
        assert_eq!(addr.to_string(), "10.0.0.1:3000");
    }

    #[test]
    fn host_addr_rejects_garbage() {
        assert!("nocolon".parse::<HostAddr>().is_err());
        assert!(":3000".parse::<HostAddr>().is_err());
        assert!("host:notaport".parse::<HostAddr>().is_err());
    }

    #[test]
    fn index_type_round_trip() {
        assert_eq!("numeric".parse::<IndexType>().unwrap(), IndexType::Numeric);
        assert_eq!(IndexType::String.as_str(), "STRING");
        assert!("GEO".parse::<IndexType>().is_err());
    }
}
