//! Scriptable mock driver for tests.
//!
//! [`MockNode`] answers info batches from a canned response table and can be
//! flipped into a failing state; [`MockClient`] records every admin call it
//! receives. Exposed behind the `test-helpers` feature so integration tests
//! (and downstream crates) can drive the whole engine without a database.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::backup::{Backup, Restore, TransferExecutor};
use crate::client::{
    ClientFactory, DatabaseClient, DatabaseNode, HostAddr, IndexType, Privilege, Role, UserRoles,
};
use crate::error::{ArgusError, ArgusResult};

/// A mock database node with scripted info responses.
pub struct MockNode {
    addr: HostAddr,
    name: RwLock<String>,
    responses: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
    pub polls: AtomicUsize,
    closed: AtomicBool,
}

impl MockNode {
    pub fn new(host: &str, port: u16) -> Arc<MockNode> {
        Arc::new(MockNode {
            addr: HostAddr::new(host, port),
            name: RwLock::new(String::new()),
            responses: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
            polls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Standard fixture: id, build, and empty blocks for everything else.
    pub fn fixture(host: &str, port: u16, id: &str, build: &str) -> Arc<MockNode> {
        let node = MockNode::new(host, port);
        node.set_name(id);
        node.set_info("node", id);
        node.set_info("build", build);
        node.set_info("cluster-name", "");
        node
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_owned();
    }

    pub fn set_info(&self, command: &str, response: &str) {
        self.responses
            .write()
            .insert(command.to_owned(), response.to_owned());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseNode for MockNode {
    fn host(&self) -> HostAddr {
        self.addr.clone()
    }

    fn name(&self) -> String {
        self.name.read().clone()
    }

    async fn request_info(
        &self,
        _timeout: Duration,
        commands: &[&str],
    ) -> ArgusResult<HashMap<String, String>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArgusError::connection(format!(
                "mock node {} is unreachable",
                self.addr
            )));
        }
        let responses = self.responses.read();
        Ok(commands
            .iter()
            .map(|c| ((*c).to_owned(), responses.get(*c).cloned().unwrap_or_default()))
            .collect())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A mock cluster driver. Admin operations append to `calls` and mutate the
/// in-memory user/role tables so query results stay consistent.
pub struct MockClient {
    nodes: RwLock<Vec<Arc<MockNode>>>,
    connected: AtomicBool,
    seeds: Mutex<Vec<HostAddr>>,
    users: RwLock<Vec<UserRoles>>,
    roles: RwLock<Vec<Role>>,
    pub calls: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Arc<MockClient> {
        Arc::new(MockClient {
            nodes: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
            seeds: Mutex::new(Vec::new()),
            users: RwLock::new(Vec::new()),
            roles: RwLock::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn add_mock_node(&self, node: Arc<MockNode>) {
        self.nodes.write().push(node);
    }

    pub fn mock_nodes(&self) -> Vec<Arc<MockNode>> {
        self.nodes.read().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_users(&self, users: Vec<UserRoles>) {
        *self.users.write() = users;
    }

    pub fn set_roles(&self, roles: Vec<Role>) {
        *self.roles.write() = roles;
    }

    pub fn seeds(&self) -> Vec<HostAddr> {
        self.seeds.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl DatabaseClient for MockClient {
    fn nodes(&self) -> Vec<Arc<dyn DatabaseNode>> {
        self.nodes
            .read()
            .iter()
            .map(|n| Arc::clone(n) as Arc<dyn DatabaseNode>)
            .collect()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn add_seeds(&self, seeds: Vec<HostAddr>) {
        self.seeds.lock().extend(seeds);
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn change_password(&self, user: &str, _password: &str) -> ArgusResult<()> {
        self.record(format!("change_password:{}", user));
        Ok(())
    }

    async fn query_user(&self, user: &str) -> ArgusResult<UserRoles> {
        self.users
            .read()
            .iter()
            .find(|u| u.user == user)
            .cloned()
            .ok_or_else(|| ArgusError::NotFound {
                resource: format!("user {}", user),
            })
    }

    async fn query_users(&self) -> ArgusResult<Vec<UserRoles>> {
        Ok(self.users.read().clone())
    }

    async fn query_role(&self, name: &str) -> ArgusResult<Role> {
        self.roles
            .read()
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| ArgusError::NotFound {
                resource: format!("role {}", name),
            })
    }

    async fn query_roles(&self) -> ArgusResult<Vec<Role>> {
        Ok(self.roles.read().clone())
    }

    async fn create_user(&self, user: &str, _password: &str, roles: &[String]) -> ArgusResult<()> {
        self.record(format!("create_user:{}", user));
        self.users.write().push(UserRoles {
            user: user.to_owned(),
            roles: roles.to_vec(),
        });
        Ok(())
    }

    async fn drop_user(&self, user: &str) -> ArgusResult<()> {
        self.record(format!("drop_user:{}", user));
        self.users.write().retain(|u| u.user != user);
        Ok(())
    }

    async fn grant_roles(&self, user: &str, roles: &[String]) -> ArgusResult<()> {
        self.record(format!("grant_roles:{}", user));
        if let Some(entry) = self.users.write().iter_mut().find(|u| u.user == user) {
            for role in roles {
                if !entry.roles.contains(role) {
                    entry.roles.push(role.clone());
                }
            }
        }
        Ok(())
    }

    async fn revoke_roles(&self, user: &str, roles: &[String]) -> ArgusResult<()> {
        self.record(format!("revoke_roles:{}", user));
        if let Some(entry) = self.users.write().iter_mut().find(|u| u.user == user) {
            entry.roles.retain(|r| !roles.contains(r));
        }
        Ok(())
    }

    async fn create_role(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()> {
        self.record(format!("create_role:{}", role));
        self.roles.write().push(Role {
            name: role.to_owned(),
            privileges: privileges.to_vec(),
        });
        Ok(())
    }

    async fn drop_role(&self, role: &str) -> ArgusResult<()> {
        self.record(format!("drop_role:{}", role));
        self.roles.write().retain(|r| r.name != role);
        Ok(())
    }

    async fn grant_privileges(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()> {
        self.record(format!("grant_privileges:{}", role));
        if let Some(entry) = self.roles.write().iter_mut().find(|r| r.name == role) {
            entry.privileges.extend(privileges.to_vec());
        }
        Ok(())
    }

    async fn revoke_privileges(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()> {
        self.record(format!("revoke_privileges:{}", role));
        if let Some(entry) = self.roles.write().iter_mut().find(|r| r.name == role) {
            entry
                .privileges
                .retain(|p| !privileges.iter().any(|q| q.code == p.code));
        }
        Ok(())
    }

    async fn create_index(
        &self,
        namespace: &str,
        _set_name: &str,
        index_name: &str,
        _bin_name: &str,
        _index_type: IndexType,
    ) -> ArgusResult<()> {
        self.record(format!("create_index:{}:{}", namespace, index_name));
        Ok(())
    }

    async fn drop_index(
        &self,
        namespace: &str,
        _set_name: &str,
        index_name: &str,
    ) -> ArgusResult<()> {
        self.record(format!("drop_index:{}:{}", namespace, index_name));
        Ok(())
    }

    async fn register_udf(&self, name: &str, _body: &[u8]) -> ArgusResult<()> {
        self.record(format!("register_udf:{}", name));
        Ok(())
    }

    async fn remove_udf(&self, name: &str) -> ArgusResult<()> {
        self.record(format!("remove_udf:{}", name));
        Ok(())
    }
}

/// Factory handing out pre-built mock clients in registration order. The
/// last client is reused once the queue drains.
pub struct MockFactory {
    clients: Mutex<VecDeque<Arc<MockClient>>>,
    last: Mutex<Option<Arc<MockClient>>>,
}

impl MockFactory {
    pub fn new() -> Arc<MockFactory> {
        Arc::new(MockFactory {
            clients: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
        })
    }

    pub fn returning(client: Arc<MockClient>) -> Arc<MockFactory> {
        let factory = MockFactory::new();
        factory.push_client(client);
        factory
    }

    pub fn push_client(&self, client: Arc<MockClient>) {
        self.clients.lock().push_back(client);
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn connect(
        &self,
        seeds: &[HostAddr],
        _user: Option<&str>,
        _password: Option<&str>,
    ) -> ArgusResult<Arc<dyn DatabaseClient>> {
        let client = {
            let mut queue = self.clients.lock();
            match queue.pop_front() {
                Some(client) => {
                    *self.last.lock() = Some(Arc::clone(&client));
                    Some(client)
                }
                None => self.last.lock().clone(),
            }
        };
        match client {
            Some(client) => {
                client.add_seeds(seeds.to_vec());
                Ok(client as Arc<dyn DatabaseClient>)
            }
            None => Err(ArgusError::connection("no mock client queued")),
        }
    }
}

/// Executor whose jobs block until released; lets tests hold a transfer
/// `in-progress` deterministically.
pub struct GatedExecutor {
    gate: Arc<tokio::sync::Semaphore>,
}

impl GatedExecutor {
    pub fn new() -> Arc<GatedExecutor> {
        Arc::new(GatedExecutor {
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
        })
    }

    /// Allow one blocked job to complete.
    pub fn release_one(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl TransferExecutor for GatedExecutor {
    async fn backup(&self, _job: Arc<Backup>) -> ArgusResult<()> {
        let permit = self.gate.acquire().await.map_err(|_| ArgusError::Internal {
            message: "gate closed".into(),
        })?;
        permit.forget();
        Ok(())
    }

    async fn restore(&self, _job: Arc<Restore>) -> ArgusResult<()> {
        let permit = self.gate.acquire().await.map_err(|_| ArgusError::Internal {
            message: "gate closed".into(),
        })?;
        permit.forget();
        Ok(())
    }
}

/// Executor that completes immediately.
pub struct NoopExecutor;

#[async_trait]
impl TransferExecutor for NoopExecutor {
    async fn backup(&self, _job: Arc<Backup>) -> ArgusResult<()> {
        Ok(())
    }

    async fn restore(&self, _job: Arc<Restore>) -> ArgusResult<()> {
        Ok(())
    }
}
