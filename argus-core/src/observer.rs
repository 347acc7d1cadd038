//! Process-wide observer.
//!
//! The [`Observer`] owns every monitored [`Cluster`], the session -> cluster
//! bindings, and the global debug switch. Its scheduler ticks on a fixed
//! cadence: dispatch refreshes for every cluster that is due (each in its own
//! task, so one panicking refresh costs only its interval), then evict
//! non-permanent clusters nobody has pinged for too long.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backup::{CommandExecutor, TransferExecutor, TransferStore};
use crate::client::{ClientFactory, HostAddr};
use crate::cluster::{permanent_id, Cluster};
use crate::config::Config;
use crate::error::{ArgusError, ArgusResult};
use crate::mailer::Mailer;
use crate::stats::Stats;

/// State of the global verbose-logging switch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugStatus {
    pub on: bool,
    pub initiator: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Parameters for registering a cluster.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub seeds: Vec<HostAddr>,
    pub alias: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub permanent: bool,
}

/// Process-wide registry of monitored clusters.
pub struct Observer {
    config: Config,
    factory: Arc<dyn ClientFactory>,
    mailer: Arc<Mailer>,
    transfer_store: TransferStore,
    transfer_executor: Arc<dyn TransferExecutor>,
    clusters: RwLock<HashMap<String, Arc<Cluster>>>,
    sessions: RwLock<HashMap<String, HashSet<String>>>,
    debug: Mutex<DebugStatus>,
    debug_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    /// Self-handle for back-references (clusters point at their observer)
    /// and for spawning the scheduler.
    self_ref: Weak<Observer>,
}

impl Observer {
    pub fn new(config: Config, factory: Arc<dyn ClientFactory>) -> Arc<Observer> {
        let mailer = Mailer::new(config.mailer.clone());
        let executor = Arc::new(CommandExecutor::new(
            config.backup.backup_command.clone(),
            config.backup.restore_command.clone(),
        ));
        Self::with_components(config, factory, mailer, executor)
    }

    /// Constructor with every collaborator injectable; used by tests.
    pub fn with_components(
        config: Config,
        factory: Arc<dyn ClientFactory>,
        mailer: Arc<Mailer>,
        transfer_executor: Arc<dyn TransferExecutor>,
    ) -> Arc<Observer> {
        let (debug_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new_cyclic(|self_ref| Observer {
            transfer_store: TransferStore::new(&config.backup.data_dir),
            config,
            factory,
            mailer,
            transfer_executor,
            clusters: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            debug: Mutex::new(DebugStatus::default()),
            debug_tx,
            shutdown_tx,
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mailer(&self) -> Arc<Mailer> {
        Arc::clone(&self.mailer)
    }

    pub(crate) fn transfer_store(&self) -> &TransferStore {
        &self.transfer_store
    }

    pub(crate) fn transfer_executor(&self) -> Arc<dyn TransferExecutor> {
        Arc::clone(&self.transfer_executor)
    }

    // ------------------------------------------------------------------
    // Registration and lookup
    // ------------------------------------------------------------------

    /// Attach a cluster. Registration is idempotent for an equivalent seed
    /// list: permanent clusters collapse onto their deterministic id, and a
    /// user-added cluster is only reused when its seeds (and user) literally
    /// match.
    pub async fn register(&self, request: RegisterRequest) -> ArgusResult<Arc<Cluster>> {
        if request.seeds.is_empty() {
            return Err(ArgusError::validation("at least one seed is required"));
        }

        if let Some(existing) = self.find_equivalent(&request) {
            if request.permanent {
                existing.set_permanent(true);
            }
            existing.update_latest_ping();
            return Ok(existing);
        }

        let client = self
            .factory
            .connect(
                &request.seeds,
                request.user.as_deref(),
                request.password.as_deref(),
            )
            .await?;

        let cluster = Cluster::new(
            self.self_ref.clone(),
            Some(client),
            request.seeds,
            request.alias,
            request.user,
            request.password,
            request.permanent,
            self.config.service.update_interval,
            Duration::from_secs(self.config.service.info_timeout),
        );

        let id = cluster.id();
        let mut clusters = self.clusters.write();
        // A racing registration with the same id wins; drop ours.
        if let Some(existing) = clusters.get(&id) {
            let existing = Arc::clone(existing);
            drop(clusters);
            cluster.close_and_unset();
            return Ok(existing);
        }
        clusters.insert(id.clone(), Arc::clone(&cluster));
        drop(clusters);

        info!(cluster = %id, permanent = cluster.is_permanent(), "cluster registered");
        Ok(cluster)
    }

    fn find_equivalent(&self, request: &RegisterRequest) -> Option<Arc<Cluster>> {
        if request.permanent {
            if let Some(existing) = self.find_by_id(&permanent_id(&request.seeds)) {
                return Some(existing);
            }
        }
        let mut wanted: Vec<HostAddr> = request.seeds.clone();
        wanted.sort();
        self.clusters().into_iter().find(|cluster| {
            let mut seeds = cluster.seeds();
            seeds.sort();
            seeds == wanted && cluster.user() == request.user
        })
    }

    /// Register every cluster from the config file as permanent.
    pub async fn register_config_clusters(&self) {
        for seed in self.config.clusters.clone() {
            let request = RegisterRequest {
                seeds: vec![HostAddr::new(seed.host.clone(), seed.port)],
                alias: (!seed.alias.is_empty()).then(|| seed.alias.clone()),
                user: (!seed.user.is_empty()).then(|| seed.user.clone()),
                password: (!seed.password.is_empty()).then(|| seed.password.clone()),
                permanent: true,
            };
            if let Err(err) = self.register(request).await {
                warn!(seed = %format!("{}:{}", seed.host, seed.port), error = %err,
                    "failed to register configured cluster");
            }
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<Arc<Cluster>> {
        self.clusters.read().get(id).cloned()
    }

    pub fn clusters(&self) -> Vec<Arc<Cluster>> {
        self.clusters.read().values().cloned().collect()
    }

    /// The cluster currently monitoring `address`, if any. Used to collapse
    /// XDR topology onto known clusters.
    pub fn node_has_been_discovered(&self, address: &str) -> Option<Arc<Cluster>> {
        self.clusters()
            .into_iter()
            .find(|cluster| cluster.find_node_by_address(address).is_some())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Create a new session id.
    pub fn new_session(&self) -> String {
        let sid = Uuid::new_v4().to_string();
        self.sessions.write().insert(sid.clone(), HashSet::new());
        sid
    }

    /// Make a cluster visible to a session. Membership, not ownership: the
    /// same cluster may be bound to many sessions.
    pub fn append_cluster_for_session(&self, session_id: &str, cluster_id: &str) {
        self.sessions
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .insert(cluster_id.to_owned());
    }

    /// The clusters bound to a session; refreshes each cluster's liveness
    /// ping as a side effect.
    pub fn clusters_for_session(&self, session_id: &str) -> ArgusResult<Vec<Arc<Cluster>>> {
        let ids: Vec<String> = {
            let sessions = self.sessions.read();
            let bound = sessions
                .get(session_id)
                .ok_or_else(|| ArgusError::NotFound {
                    resource: format!("session {}", session_id),
                })?;
            bound.iter().cloned().collect()
        };

        let mut clusters = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(cluster) = self.find_by_id(&id) {
                cluster.update_latest_ping();
                clusters.push(cluster);
            }
        }
        Ok(clusters)
    }

    /// Remove a single cluster binding; the cluster itself stays registered.
    pub fn remove_cluster_from_session(&self, session_id: &str, cluster_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        sessions
            .get_mut(session_id)
            .map(|bound| bound.remove(cluster_id))
            .unwrap_or(false)
    }

    pub fn remove_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    /// Datacenter views of every cluster a session can see, keyed by cluster
    /// id. Backs the multi-cluster topology page.
    pub fn multi_cluster_view(&self, session_id: &str) -> ArgusResult<Stats> {
        let clusters = self.clusters_for_session(session_id)?;
        let mut view = Stats::new();
        for cluster in clusters {
            view.insert(cluster.id(), cluster.datacenter_info());
        }
        Ok(view)
    }

    // ------------------------------------------------------------------
    // Debug switch
    // ------------------------------------------------------------------

    /// Current debug state; an expired record reads (and becomes) off.
    pub fn debug_status(&self) -> DebugStatus {
        let mut debug = self.debug.lock();
        if debug.on {
            if let Some(expires_at) = debug.expires_at {
                if expires_at <= Utc::now() {
                    *debug = DebugStatus::default();
                    let _ = self.debug_tx.send(false);
                }
            }
        }
        debug.clone()
    }

    /// Turn verbose logging on for `duration`, attributing it to
    /// `initiator`. Restarting extends the expiry.
    pub fn start_debug(&self, initiator: &str, duration: Duration) -> DebugStatus {
        let now = Utc::now();
        let status = DebugStatus {
            on: true,
            initiator: Some(initiator.to_owned()),
            start_time: Some(now),
            expires_at: Some(
                now + chrono::Duration::from_std(duration)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
            ),
        };
        *self.debug.lock() = status.clone();
        let _ = self.debug_tx.send(true);
        info!(initiator, ?duration, "debug mode enabled");
        status
    }

    pub fn stop_debug(&self) -> DebugStatus {
        let status = DebugStatus::default();
        *self.debug.lock() = status.clone();
        let _ = self.debug_tx.send(false);
        info!("debug mode disabled");
        status
    }

    /// Receiver that flips when debug mode changes; the binary uses it to
    /// swap the tracing filter.
    pub fn debug_changes(&self) -> watch::Receiver<bool> {
        self.debug_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Spawn the discovery/eviction loop. Runs until [`Observer::shutdown`].
    pub fn start(&self) -> JoinHandle<()> {
        let Some(observer) = self.self_ref.upgrade() else {
            return tokio::spawn(async {});
        };
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let tick = Duration::from_secs(observer.config.service.scheduler_tick.max(1));
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => observer.observe_once().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("observer scheduler stopped");
        })
    }

    /// One scheduler tick: refresh every due cluster concurrently, then scan
    /// for auto-removal.
    pub async fn observe_once(&self) {
        let due: Vec<Arc<Cluster>> = self
            .clusters()
            .into_iter()
            .filter(|c| c.is_set() && c.should_update())
            .collect();

        let mut handles = Vec::with_capacity(due.len());
        for cluster in due {
            handles.push(tokio::spawn(async move { cluster.update().await }));
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "cluster refresh reported an error"),
                Err(join_err) if join_err.is_panic() => {
                    // The interval is lost; the scheduler keeps going.
                    error!("cluster refresh panicked: {}", join_err);
                }
                Err(_) => {}
            }
        }

        let inactive = self.config.service.inactive_dur_before_removal;
        let doomed: Vec<Arc<Cluster>> = self
            .clusters()
            .into_iter()
            .filter(|c| c.should_auto_remove(inactive))
            .collect();
        for cluster in doomed {
            self.remove_cluster(&cluster);
        }
    }

    fn remove_cluster(&self, cluster: &Arc<Cluster>) {
        let id = cluster.id();
        cluster.close_and_unset();
        self.clusters.write().remove(&id);
        let mut sessions = self.sessions.write();
        for bound in sessions.values_mut() {
            bound.remove(&id);
        }
        info!(cluster = %id, "inactive cluster removed");
    }

    /// Stop the scheduler and close every cluster exactly once.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for cluster in self.clusters() {
            cluster.close_and_unset();
        }
        info!("observer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::Mailer;
    use crate::test_helpers::{MockFactory, NoopExecutor};

    fn observer() -> Arc<Observer> {
        Observer::with_components(
            Config::default(),
            MockFactory::new(),
            Mailer::new(Default::default()),
            Arc::new(NoopExecutor),
        )
    }

    /// Build a cluster against this observer without going through the
    /// factory; `client: None` keeps it offline.
    fn bare_cluster(observer: &Arc<Observer>, permanent: bool) -> Arc<Cluster> {
        Cluster::new(
            observer.self_ref.clone(),
            None,
            vec![HostAddr::new("10.0.0.1", 3000)],
            None,
            None,
            None,
            permanent,
            5,
            Duration::from_secs(10),
        )
    }

    #[test]
    fn auto_removal_predicate() {
        let observer = observer();

        let cluster = bare_cluster(&observer, false);
        // Freshly pinged: not eligible.
        assert!(!cluster.should_auto_remove(60));

        cluster.backdate_last_ping(Duration::from_secs(120));
        assert!(cluster.should_auto_remove(60));

        // Zero or negative disables eviction entirely.
        assert!(!cluster.should_auto_remove(0));
        assert!(!cluster.should_auto_remove(-1));

        let permanent = bare_cluster(&observer, true);
        permanent.backdate_last_ping(Duration::from_secs(120));
        assert!(!permanent.should_auto_remove(60));
    }

    #[test]
    fn debug_status_expires_on_read() {
        let observer = observer();

        let status = observer.start_debug("192.168.1.7:55555", Duration::from_secs(60));
        assert!(status.on);
        assert_eq!(status.initiator.as_deref(), Some("192.168.1.7:55555"));
        assert!(observer.debug_status().on);

        // A zero-duration record is already past its expiry when read, and
        // the read flips the stored state off.
        observer.start_debug("192.168.1.7:55555", Duration::ZERO);
        assert!(!observer.debug_status().on);
        assert!(observer.debug_status().initiator.is_none());

        observer.start_debug("x", Duration::from_secs(60));
        assert!(!observer.stop_debug().on);
        assert!(!observer.debug_status().on);
    }

    #[test]
    fn session_bindings_detach_cleanly() {
        let observer = observer();

        let sid = observer.new_session();
        observer.append_cluster_for_session(&sid, "c1");
        assert!(observer.remove_cluster_from_session(&sid, "c1"));
        assert!(!observer.remove_cluster_from_session(&sid, "c1"));
        assert!(!observer.remove_cluster_from_session("ghost", "c1"));

        observer.remove_session(&sid);
        assert!(observer.clusters_for_session(&sid).is_err());
    }
}
