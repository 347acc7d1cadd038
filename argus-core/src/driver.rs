//! Bundled database driver.
//!
//! Implements the monitoring half of the [`crate::client`] contract over the
//! database's line-oriented info port: each command is one request line, each
//! response one line (optionally echoing the command followed by a tab). Peer
//! discovery rides the `services` response. Security RPCs are enterprise
//! driver territory and report [`ArgusError::NotSupported`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::client::{
    ClientFactory, DatabaseClient, DatabaseNode, HostAddr, IndexType, Privilege, Role, UserRoles,
};
use crate::error::{ArgusError, ArgusResult};

/// How often the driver re-probes seeds and known peers.
const TEND_INTERVAL: Duration = Duration::from_secs(10);
/// Timeout for discovery probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One node endpoint; connections are opened per info batch.
pub struct InfoNode {
    addr: HostAddr,
    name: RwLock<String>,
}

impl InfoNode {
    fn new(addr: HostAddr) -> Arc<InfoNode> {
        Arc::new(InfoNode {
            addr,
            name: RwLock::new(String::new()),
        })
    }

    async fn conversation(
        &self,
        commands: &[&str],
    ) -> Result<HashMap<String, String>, std::io::Error> {
        let stream = TcpStream::connect((self.addr.host.as_str(), self.addr.port)).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut payload = String::new();
        for command in commands {
            payload.push_str(command);
            payload.push('\n');
        }
        write_half.write_all(payload.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut responses = HashMap::with_capacity(commands.len());
        for command in commands {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-response",
                ));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            // Some servers echo `command\tresponse`.
            let body = match line.split_once('\t') {
                Some((echoed, rest)) if echoed == *command => rest,
                _ => line,
            };
            responses.insert((*command).to_owned(), body.to_owned());
        }
        Ok(responses)
    }
}

#[async_trait]
impl DatabaseNode for InfoNode {
    fn host(&self) -> HostAddr {
        self.addr.clone()
    }

    fn name(&self) -> String {
        self.name.read().clone()
    }

    async fn request_info(
        &self,
        timeout: Duration,
        commands: &[&str],
    ) -> ArgusResult<HashMap<String, String>> {
        match tokio::time::timeout(timeout, self.conversation(commands)).await {
            Ok(Ok(responses)) => Ok(responses),
            Ok(Err(err)) => Err(ArgusError::connection(format!(
                "info request to {} failed: {}",
                self.addr, err
            ))),
            Err(_) => Err(ArgusError::Timeout {
                operation: format!("info request to {}", self.addr),
            }),
        }
    }

    fn close(&self) {}
}

struct DriverState {
    nodes: HashMap<HostAddr, Arc<InfoNode>>,
}

/// Driver handle for one cluster.
pub struct InfoDriver {
    seeds: Mutex<Vec<HostAddr>>,
    state: RwLock<DriverState>,
    closed: AtomicBool,
}

impl InfoDriver {
    /// Connect to a cluster through its seeds. Fails when no seed answers.
    pub async fn connect(seeds: Vec<HostAddr>) -> ArgusResult<Arc<InfoDriver>> {
        let driver = Arc::new(InfoDriver {
            seeds: Mutex::new(seeds),
            state: RwLock::new(DriverState {
                nodes: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
        });

        driver.refresh_peers().await;
        if driver.state.read().nodes.is_empty() {
            return Err(ArgusError::connection("unable to reach any seed node"));
        }

        let weak: Weak<InfoDriver> = Arc::downgrade(&driver);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TEND_INTERVAL).await;
                let Some(driver) = weak.upgrade() else { break };
                if driver.closed.load(Ordering::SeqCst) {
                    break;
                }
                driver.refresh_peers().await;
            }
        });

        Ok(driver)
    }

    /// Probe seeds plus every known node; learn new peers from `services`.
    async fn refresh_peers(&self) {
        let mut candidates: Vec<HostAddr> = self.seeds.lock().clone();
        candidates.extend(self.state.read().nodes.keys().cloned());
        candidates.sort();
        candidates.dedup();

        for addr in candidates {
            let node = {
                let state = self.state.read();
                state.nodes.get(&addr).cloned()
            }
            .unwrap_or_else(|| InfoNode::new(addr.clone()));

            let responses = match node
                .request_info(PROBE_TIMEOUT, &["node", "services"])
                .await
            {
                Ok(responses) => responses,
                Err(err) => {
                    trace!(node = %addr, error = %err, "discovery probe failed");
                    continue;
                }
            };

            if let Some(name) = responses.get("node") {
                *node.name.write() = name.trim().to_owned();
            }

            let mut state = self.state.write();
            state.nodes.entry(addr.clone()).or_insert_with(|| Arc::clone(&node));
            if let Some(services) = responses.get("services") {
                for peer in services.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                    if let Ok(peer_addr) = peer.parse::<HostAddr>() {
                        state
                            .nodes
                            .entry(peer_addr.clone())
                            .or_insert_with(|| InfoNode::new(peer_addr));
                    }
                }
            }
            drop(state);
            debug!(node = %addr, "discovery probe ok");
        }
    }

    fn unsupported<T>(operation: &str) -> ArgusResult<T> {
        Err(ArgusError::NotSupported {
            operation: operation.to_owned(),
        })
    }
}

#[async_trait]
impl DatabaseClient for InfoDriver {
    fn nodes(&self) -> Vec<Arc<dyn DatabaseNode>> {
        self.state
            .read()
            .nodes
            .values()
            .map(|n| Arc::clone(n) as Arc<dyn DatabaseNode>)
            .collect()
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.state.read().nodes.is_empty()
    }

    fn add_seeds(&self, seeds: Vec<HostAddr>) {
        let mut stored = self.seeds.lock();
        for seed in seeds {
            if !stored.contains(&seed) {
                stored.push(seed);
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.write().nodes.clear();
    }

    async fn change_password(&self, _user: &str, _password: &str) -> ArgusResult<()> {
        Self::unsupported("change_password")
    }

    async fn query_user(&self, _user: &str) -> ArgusResult<UserRoles> {
        Self::unsupported("query_user")
    }

    async fn query_users(&self) -> ArgusResult<Vec<UserRoles>> {
        Self::unsupported("query_users")
    }

    async fn query_role(&self, _name: &str) -> ArgusResult<Role> {
        Self::unsupported("query_role")
    }

    async fn query_roles(&self) -> ArgusResult<Vec<Role>> {
        Self::unsupported("query_roles")
    }

    async fn create_user(
        &self,
        _user: &str,
        _password: &str,
        _roles: &[String],
    ) -> ArgusResult<()> {
        Self::unsupported("create_user")
    }

    async fn drop_user(&self, _user: &str) -> ArgusResult<()> {
        Self::unsupported("drop_user")
    }

    async fn grant_roles(&self, _user: &str, _roles: &[String]) -> ArgusResult<()> {
        Self::unsupported("grant_roles")
    }

    async fn revoke_roles(&self, _user: &str, _roles: &[String]) -> ArgusResult<()> {
        Self::unsupported("revoke_roles")
    }

    async fn create_role(&self, _role: &str, _privileges: &[Privilege]) -> ArgusResult<()> {
        Self::unsupported("create_role")
    }

    async fn drop_role(&self, _role: &str) -> ArgusResult<()> {
        Self::unsupported("drop_role")
    }

    async fn grant_privileges(&self, _role: &str, _privileges: &[Privilege]) -> ArgusResult<()> {
        Self::unsupported("grant_privileges")
    }

    async fn revoke_privileges(&self, _role: &str, _privileges: &[Privilege]) -> ArgusResult<()> {
        Self::unsupported("revoke_privileges")
    }

    async fn create_index(
        &self,
        _namespace: &str,
        _set_name: &str,
        _index_name: &str,
        _bin_name: &str,
        _index_type: IndexType,
    ) -> ArgusResult<()> {
        Self::unsupported("create_index")
    }

    async fn drop_index(
        &self,
        _namespace: &str,
        _set_name: &str,
        _index_name: &str,
    ) -> ArgusResult<()> {
        Self::unsupported("drop_index")
    }

    async fn register_udf(&self, _name: &str, _body: &[u8]) -> ArgusResult<()> {
        Self::unsupported("register_udf")
    }

    async fn remove_udf(&self, _name: &str) -> ArgusResult<()> {
        Self::unsupported("remove_udf")
    }
}

/// Factory wiring [`InfoDriver`] into the observer.
#[derive(Debug, Default)]
pub struct InfoDriverFactory;

#[async_trait]
impl ClientFactory for InfoDriverFactory {
    async fn connect(
        &self,
        seeds: &[HostAddr],
        _user: Option<&str>,
        _password: Option<&str>,
    ) -> ArgusResult<Arc<dyn DatabaseClient>> {
        let driver = InfoDriver::connect(seeds.to_vec()).await?;
        Ok(driver as Arc<dyn DatabaseClient>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Minimal info responder: answers each request line with a canned value.
    async fn serve_once(listener: TcpListener, answers: HashMap<String, String>) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap() > 0 {
            let command = line.trim_end();
            let body = answers.get(command).cloned().unwrap_or_default();
            let response = format!("{}\t{}\n", command, body);
            write_half.write_all(response.as_bytes()).await.unwrap();
            line.clear();
        }
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest).await;
    }

    #[tokio::test]
    async fn node_round_trip_strips_command_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let answers = HashMap::from([
            ("build".to_owned(), "4.5.1".to_owned()),
            ("node".to_owned(), "BB9000000000001".to_owned()),
        ]);
        let server = tokio::spawn(serve_once(listener, answers));

        let node = InfoNode::new(HostAddr::new("127.0.0.1", port));
        let responses = node
            .request_info(Duration::from_secs(2), &["build", "node"])
            .await
            .unwrap();
        assert_eq!(responses.get("build").unwrap(), "4.5.1");
        assert_eq!(responses.get("node").unwrap(), "BB9000000000001");
        drop(node);
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_node_reports_connection_error() {
        // Port 1 is essentially guaranteed closed.
        let node = InfoNode::new(HostAddr::new("127.0.0.1", 1));
        let err = node
            .request_info(Duration::from_secs(1), &["build"])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
