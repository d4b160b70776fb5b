use pbkv::grpc::grpc_kv_frontend_client::GrpcKvFrontendClient;
use pbkv::grpc::{ProtoGetRequest, ProtoPutRequest};
use pbkv::{
    try_start_dispatcher, try_start_registry, try_start_replica, DispatchError, DispatcherConfig,
    DispatcherServerHandle, RegistryServerConfig, RegistryServerHandle, Replica, ReplicaHandle,
    ReplicaRole, ReplicaServerConfig, ReplicaServerHandle,
};
use slog::Drain;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tonic::Code;

/// Discovery ticks fast in tests so a scan happens within a test's patience.
const TEST_DISCOVERY_INTERVAL: Duration = Duration::from_millis(150);

/// How long polling loops wait before declaring a condition unreachable.
const PATIENCE: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One registry plus any number of replicas, all bound to ephemeral loopback
/// ports so concurrently running tests never collide.
struct TestCluster {
    logger: slog::Logger,
    registry_endpoint: String,
    _registry: RegistryServerHandle,
    replicas: HashMap<u64, ReplicaServerHandle>,
}

impl TestCluster {
    async fn start() -> Self {
        let logger = create_root_logger_for_stdout();
        let registry = try_start_registry(RegistryServerConfig {
            logger: logger.clone(),
            listen_addr: loopback(),
        })
        .await
        .expect("registry failed to start");
        let registry_endpoint = registry.local_addr.to_string();

        TestCluster {
            logger,
            registry_endpoint,
            _registry: registry,
            replicas: HashMap::new(),
        }
    }

    async fn add_replica(&mut self, id: u64, initial_role: ReplicaRole) {
        self.add_replica_with_backups(id, initial_role, &[]).await;
    }

    async fn add_replica_with_backups(
        &mut self,
        id: u64,
        initial_role: ReplicaRole,
        backup_ids: &[u64],
    ) {
        let handle = try_start_replica(ReplicaServerConfig {
            logger: self.logger.clone(),
            id,
            listen_addr: loopback(),
            registry_endpoint: self.registry_endpoint.clone(),
            initial_role,
            initial_backup_ids: backup_ids.to_vec(),
        })
        .await
        .expect("replica failed to start");

        self.replicas.insert(id, handle);
    }

    async fn start_dispatcher(&self, primary_id: u64, backup_ids: &[u64]) -> DispatcherServerHandle {
        try_start_dispatcher(DispatcherConfig {
            logger: self.logger.clone(),
            listen_addr: loopback(),
            registry_endpoint: self.registry_endpoint.clone(),
            initial_primary_id: primary_id,
            initial_backup_ids: backup_ids.to_vec(),
            discovery_interval: TEST_DISCOVERY_INTERVAL,
        })
        .await
        .expect("dispatcher failed to start")
    }

    /// Direct access to a running replica's state machine, for asserting on
    /// its store without going over the wire.
    fn replica(&self, id: u64) -> &Arc<Replica> {
        &self
            .replicas
            .get(&id)
            .unwrap_or_else(|| panic!("replica {} is not running", id))
            .replica
    }

    /// Wire-level handle to a running replica, exactly what the dispatcher
    /// and peer replicas hold.
    async fn connect(&self, id: u64) -> ReplicaHandle {
        let handle = self
            .replicas
            .get(&id)
            .unwrap_or_else(|| panic!("replica {} is not running", id));

        ReplicaHandle::connect(format!("replica{}", id), handle.local_addr.to_string())
            .await
            .expect("failed to connect to replica")
    }

    /// Stops a replica's server. Returns the orphaned state machine so tests
    /// can assert what the process held when it died. The registry binding is
    /// deliberately left behind, as a crashed process would leave it.
    async fn kill_replica(&mut self, id: u64) -> Arc<Replica> {
        let handle = self
            .replicas
            .remove(&id)
            .unwrap_or_else(|| panic!("replica {} is not running", id));
        let orphan = Arc::clone(&handle.replica);
        drop(handle);

        // Give the server task a moment to drain and close the listener so
        // the next RPC against it fails instead of racing the shutdown.
        tokio::time::sleep(Duration::from_millis(100)).await;

        orphan
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

#[tokio::test]
async fn puts_ack_only_after_every_backup_holds_the_state() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    cluster.add_replica(2, ReplicaRole::Backup).await;
    cluster.add_replica(3, ReplicaRole::Backup).await;

    let primary = cluster.connect(1).await;

    for (key, value) in [("a", "1"), ("b", "2"), ("a", "3")] {
        assert!(primary.put(key, value).await.unwrap());

        // The ack means the fan-out is done, so the comparison may run
        // immediately, with no settling sleep.
        let primary_state = cluster.replica(1).handle_get_state().await;
        for backup_id in [2, 3] {
            let backup_state = cluster.replica(backup_id).handle_get_state().await;
            assert_eq!(
                primary_state, backup_state,
                "replica {} diverged after acknowledged put({}, {})",
                backup_id, key, value
            );
        }
    }

    assert_eq!(Some("3".to_owned()), cluster.replica(2).handle_get("a").await);
    assert_eq!(Some("3".to_owned()), cluster.replica(3).handle_get("a").await);
}

#[tokio::test]
async fn backup_refuses_wire_puts_without_mutating() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    cluster.add_replica(2, ReplicaRole::Backup).await;

    let backup = cluster.connect(2).await;

    let applied = backup.put("a", "1").await.unwrap();

    assert!(!applied, "a backup must refuse writes");
    assert!(cluster.replica(2).handle_get_state().await.is_empty());
    assert_eq!(ReplicaRole::Backup, cluster.replica(2).role().await);
}

#[tokio::test]
async fn promoting_the_primary_again_changes_nothing() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    cluster.add_replica(2, ReplicaRole::Backup).await;

    let primary = cluster.connect(1).await;
    assert!(primary.put("a", "1").await.unwrap());

    primary.promote_to_primary().await.unwrap();

    assert_eq!(ReplicaRole::Primary, cluster.replica(1).role().await);
    assert_eq!(map(&[("a", "1")]), cluster.replica(1).handle_get_state().await);

    // Pushes still reach the backup afterwards.
    assert!(primary.put("b", "2").await.unwrap());
    assert_eq!(Some("2".to_owned()), cluster.replica(2).handle_get("b").await);
}

#[tokio::test]
async fn full_state_push_overwrites_wholesale() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Backup).await;

    let target = cluster.connect(1).await;

    target.push_full_state(&map(&[("a", "1"), ("b", "2")])).await.unwrap();
    assert_eq!(
        map(&[("a", "1"), ("b", "2")]),
        cluster.replica(1).handle_get_state().await
    );

    // Overlapping keys: "b" is replaced, "a" must not survive.
    target.push_full_state(&map(&[("b", "9"), ("c", "3")])).await.unwrap();
    assert_eq!(
        map(&[("b", "9"), ("c", "3")]),
        cluster.replica(1).handle_get_state().await
    );

    // Disjoint keys: nothing from the previous snapshot survives.
    target.push_full_state(&map(&[("x", "7")])).await.unwrap();
    assert_eq!(map(&[("x", "7")]), cluster.replica(1).handle_get_state().await);

    target.push_full_state(&HashMap::new()).await.unwrap();
    assert!(cluster.replica(1).handle_get_state().await.is_empty());
}

#[tokio::test]
async fn failover_promotes_the_first_backup_with_current_data() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    cluster.add_replica(2, ReplicaRole::Backup).await;
    cluster.add_replica(3, ReplicaRole::Backup).await;
    let dispatcher = cluster.start_dispatcher(1, &[2, 3]).await;

    assert!(dispatcher.dispatcher.put("a", "1").await.unwrap());
    assert!(dispatcher.dispatcher.put("b", "2").await.unwrap());

    let lost_primary = cluster.kill_replica(1).await;
    let last_acknowledged = lost_primary.handle_get_state().await;

    // The read triggers failure detection, promotion of the queue head, and a
    // retry against the new primary, all within one request.
    assert_eq!(
        Some("1".to_owned()),
        dispatcher.dispatcher.get("a").await.unwrap()
    );

    assert_eq!(Some("replica2".to_owned()), dispatcher.dispatcher.primary_name());
    assert_eq!(ReplicaRole::Primary, cluster.replica(2).role().await);
    assert_eq!(last_acknowledged, cluster.replica(2).handle_get_state().await);
    assert_eq!(
        vec!["replica3".to_owned()],
        dispatcher.dispatcher.backup_names().await
    );
}

#[tokio::test]
async fn requests_fail_unavailable_once_backups_run_out() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    let dispatcher = cluster.start_dispatcher(1, &[]).await;

    assert!(dispatcher.dispatcher.put("a", "1").await.unwrap());

    let lost_primary = cluster.kill_replica(1).await;

    // First request exhausts the (empty) queue and uninstalls the primary.
    let result = dispatcher.dispatcher.put("b", "2").await;
    assert!(matches!(result, Err(DispatchError::Exhausted)));

    // Later requests fail the same way without a primary to even try.
    let result = dispatcher.dispatcher.get("a").await;
    assert!(matches!(result, Err(DispatchError::Exhausted)));

    // Over the wire the same condition surfaces as UNAVAILABLE.
    let mut frontend =
        GrpcKvFrontendClient::connect(format!("http://{}", dispatcher.local_addr))
            .await
            .unwrap();
    let status = frontend
        .put(ProtoPutRequest {
            key: "c".to_owned(),
            value: "3".to_owned(),
        })
        .await
        .unwrap_err();
    assert_eq!(Code::Unavailable, status.code());
    let status = frontend
        .get(ProtoGetRequest {
            key: "a".to_owned(),
        })
        .await
        .unwrap_err();
    assert_eq!(Code::Unavailable, status.code());

    // No partial state anywhere: the dead primary still holds exactly the
    // state from before the failed writes.
    assert_eq!(map(&[("a", "1")]), lost_primary.handle_get_state().await);
}

#[tokio::test]
async fn discovery_adopts_and_seeds_newcomers_exactly_once() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    let dispatcher = cluster.start_dispatcher(1, &[]).await;

    assert!(dispatcher.dispatcher.put("a", "1").await.unwrap());

    cluster.add_replica(2, ReplicaRole::Backup).await;

    let deadline = Instant::now() + PATIENCE;
    loop {
        let names = dispatcher.dispatcher.backup_names().await;
        if names == ["replica2"] {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for replica2 to be adopted; queue = {:?}",
            names
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    // The newcomer was seeded from the primary before it was queued, so it is
    // already promotable without ever having received a put's push.
    assert_eq!(Some("1".to_owned()), cluster.replica(2).handle_get("a").await);

    // Further scans with an unchanged registry must not duplicate the entry.
    tokio::time::sleep(TEST_DISCOVERY_INTERVAL * 4).await;
    assert_eq!(
        vec!["replica2".to_owned()],
        dispatcher.dispatcher.backup_names().await
    );
}

/// Scenario: a put lands on the primary and replicates; the primary is then
/// stopped and the same key must be served by the promoted backup.
#[tokio::test]
async fn replicated_data_survives_losing_the_primary() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(2, ReplicaRole::Backup).await;
    cluster.add_replica(3, ReplicaRole::Backup).await;
    cluster.add_replica_with_backups(1, ReplicaRole::Primary, &[2, 3]).await;
    let dispatcher = cluster.start_dispatcher(1, &[2, 3]).await;

    // The write goes straight to replica 1's client-op surface, exactly what
    // the dispatcher would have sent it.
    let primary = cluster.connect(1).await;
    assert!(primary.put("a", "1").await.unwrap());

    assert_eq!(Some("1".to_owned()), cluster.replica(2).handle_get("a").await);
    assert_eq!(Some("1".to_owned()), cluster.replica(3).handle_get("a").await);

    cluster.kill_replica(1).await;

    assert_eq!(
        Some("1".to_owned()),
        dispatcher.dispatcher.get("a").await.unwrap()
    );
    assert_eq!(Some("replica2".to_owned()), dispatcher.dispatcher.primary_name());
    assert_eq!(ReplicaRole::Primary, cluster.replica(2).role().await);
}

#[tokio::test]
async fn write_refused_by_stale_primary_is_not_a_failover_trigger() {
    let mut cluster = TestCluster::start().await;
    // Replica 1 never becomes primary; the dispatcher's pointer is stale from
    // the start.
    cluster.add_replica(1, ReplicaRole::Backup).await;
    cluster.add_replica(2, ReplicaRole::Backup).await;
    let dispatcher = cluster.start_dispatcher(1, &[2]).await;

    // The replica is reachable and answers "not ok". That is an application
    // result, not a failure, so nothing is promoted.
    assert!(!dispatcher.dispatcher.put("a", "1").await.unwrap());

    assert_eq!(Some("replica1".to_owned()), dispatcher.dispatcher.primary_name());
    assert_eq!(
        vec!["replica2".to_owned()],
        dispatcher.dispatcher.backup_names().await
    );
    assert!(cluster.replica(1).handle_get_state().await.is_empty());
    assert_eq!(ReplicaRole::Backup, cluster.replica(2).role().await);
}

#[tokio::test]
async fn frontend_serves_put_and_get_over_grpc() {
    let mut cluster = TestCluster::start().await;
    cluster.add_replica(1, ReplicaRole::Primary).await;
    cluster.add_replica(2, ReplicaRole::Backup).await;
    let dispatcher = cluster.start_dispatcher(1, &[2]).await;

    let mut frontend =
        GrpcKvFrontendClient::connect(format!("http://{}", dispatcher.local_addr))
            .await
            .unwrap();

    // An empty string is a legitimate value, distinct from absence.
    let reply = frontend
        .put(ProtoPutRequest {
            key: "greeting".to_owned(),
            value: String::new(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(reply.ok);

    let reply = frontend
        .get(ProtoGetRequest {
            key: "greeting".to_owned(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(reply.found);
    assert_eq!("", reply.value);

    let reply = frontend
        .get(ProtoGetRequest {
            key: "missing".to_owned(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!reply.found);
}
