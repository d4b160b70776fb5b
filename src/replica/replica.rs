use crate::net::ConnectError;
use crate::registry::{RegistryClient, RegistryError, ReplicaName};
use crate::replica::peer_client::{PeerUnreachable, ReplicaHandle, ResolveError};
use crate::replica::store::KeyValueStore;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Which side of the replication protocol this process currently plays.
/// Transitions are one-way: a Backup may be promoted, a Primary is never
/// demoted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplicaRole {
    Primary,
    Backup,
}

/// Everything the state lock guards. Role, store and peer bookkeeping move
/// together; there is no observable state where one is newer than the others.
struct ReplicaState {
    role: ReplicaRole,
    store: KeyValueStore,
    /// Live peers the current put is pushing to. Rebuilt from the registry on
    /// every put and on promotion.
    backups: Vec<ReplicaHandle>,
    /// Names that failed lookup or ping once. Never retried: a dead process
    /// costs one probe, not one probe per write.
    ignored_names: HashSet<String>,
}

/// A single replica: one store, one role, one lock.
///
/// The lock is a tokio [`Mutex`] because it is held across the registry and
/// push RPCs inside `handle_put`. A put only returns once every reachable
/// backup holds the post-write snapshot, and holding the lock for that whole
/// span keeps the write and its fan-out atomic against concurrent promotion
/// and incoming pushes. Ping stays off the lock so a replica mid-fan-out
/// still answers liveness probes.
pub struct Replica {
    logger: slog::Logger,
    my_name: ReplicaName,
    registry: RegistryClient,
    state: Mutex<ReplicaState>,
}

/// A put refused at the application level. Wire-level failures surface as
/// [`PeerUnreachable`] on the caller's side instead.
#[derive(Debug, thiserror::Error)]
pub enum PutError {
    /// The caller acted on stale primary information. Nothing was written.
    #[error("replica '{replica}' is not the primary")]
    NotPrimary { replica: String },
}

impl Replica {
    pub(crate) fn new(
        logger: slog::Logger,
        my_name: ReplicaName,
        initial_role: ReplicaRole,
        registry: RegistryClient,
    ) -> Self {
        Replica {
            logger,
            my_name,
            registry,
            state: Mutex::new(ReplicaState {
                role: initial_role,
                store: KeyValueStore::new(),
                backups: Vec::new(),
                ignored_names: HashSet::new(),
            }),
        }
    }

    pub fn name(&self) -> &ReplicaName {
        &self.my_name
    }

    pub async fn role(&self) -> ReplicaRole {
        self.state.lock().await.role
    }

    /// Apply a client write, then synchronously push the resulting snapshot
    /// to every reachable backup. Returns only after the fan-out completes; a
    /// backup that fails its push is dropped from the set rather than failing
    /// the put.
    pub async fn handle_put(&self, key: String, value: String) -> Result<(), PutError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.role != ReplicaRole::Primary {
            slog::warn!(
                self.logger,
                "Refusing put for key '{}': not the primary",
                key
            );
            return Err(PutError::NotPrimary {
                replica: self.my_name.as_str().to_owned(),
            });
        }

        state.store.put(key, value);
        let snapshot = state.store.snapshot();

        // Membership may have changed since the last write. Rebuild the
        // backup set from the registry instead of trusting the previous one.
        let discovered = self.discover_backups(&mut state.ignored_names).await;

        let mut reachable = Vec::with_capacity(discovered.len());
        for backup in discovered {
            match backup.push_full_state(&snapshot).await {
                Ok(()) => reachable.push(backup),
                Err(err) => {
                    // Not sticky: a push failure drops the peer from this set
                    // only, and the next discovery round may re-admit it.
                    slog::warn!(
                        self.logger,
                        "Dropping backup '{}' after failed state push: {}",
                        backup.name(),
                        err
                    );
                }
            }
        }
        state.backups = reachable;

        Ok(())
    }

    /// Plain read of the local store. No role gate: a read served by a backup
    /// answers from whatever state it last received.
    pub async fn handle_get(&self, key: &str) -> Option<String> {
        self.state.lock().await.store.get(key)
    }

    /// Consistent copy of the whole store, taken under the state lock.
    pub async fn handle_get_state(&self) -> HashMap<String, String> {
        self.state.lock().await.store.snapshot()
    }

    /// Overwrite the whole store with `snapshot`. No role gate: only backups
    /// receive pushes in normal operation, and a push landing on a primary
    /// overwrites its data. Known sharp edge of the protocol.
    pub async fn handle_push_full_state(&self, snapshot: HashMap<String, String>) {
        let mut state = self.state.lock().await;

        state.store.replace(snapshot);
        slog::info!(
            self.logger,
            "Applied full-state push of {} entries",
            state.store.len()
        );
    }

    /// Switch to Primary and take over push duties. Idempotent: promoting a
    /// primary changes nothing, so two failover attempts racing on the same
    /// candidate converge instead of erroring.
    ///
    /// The store is untouched. Under synchronous push a backup already holds
    /// the latest acknowledged state, so there is nothing to catch up on.
    pub async fn handle_promote(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.role == ReplicaRole::Primary {
            slog::info!(self.logger, "Promotion requested but already primary");
            return;
        }

        state.role = ReplicaRole::Primary;
        let discovered = self.discover_backups(&mut state.ignored_names).await;
        state.backups = discovered;

        slog::info!(
            self.logger,
            "Promoted to primary with {} backup(s)",
            state.backups.len()
        );
    }

    /// Liveness probe. Deliberately lock-free, see the struct docs.
    pub fn handle_ping(&self) -> bool {
        true
    }

    /// Install the backup set a starting primary was configured with. The
    /// first put rebuilds the set from the registry anyway.
    pub(crate) async fn set_initial_backups(&self, backups: Vec<ReplicaHandle>) {
        let mut state = self.state.lock().await;
        state.backups = backups;
    }

    /// Rebuild the live backup set from the registry: every name matching the
    /// replica convention, except this replica and names already written off.
    /// A name that fails lookup, connect or ping is written off for good. A
    /// registry outage empties the set for this round and is not sticky.
    async fn discover_backups(&self, ignored_names: &mut HashSet<String>) -> Vec<ReplicaHandle> {
        let names = match self.registry.list_names().await {
            Ok(names) => names,
            Err(err) => {
                slog::error!(self.logger, "Registry listing failed: {}", err);
                return Vec::new();
            }
        };

        let mut backups = Vec::new();
        for name in names {
            if !ReplicaName::matches_convention(&name) {
                continue;
            }
            if name == self.my_name.as_str() {
                continue;
            }
            if ignored_names.contains(&name) {
                continue;
            }

            match self.resolve_and_ping(&name).await {
                Ok(handle) => backups.push(handle),
                Err(err) => {
                    slog::warn!(
                        self.logger,
                        "Writing off replica '{}' after failed probe: {}",
                        name,
                        err
                    );
                    ignored_names.insert(name);
                }
            }
        }

        backups
    }

    async fn resolve_and_ping(&self, name: &str) -> Result<ReplicaHandle, ProbeError> {
        let handle = ReplicaHandle::resolve(&self.registry, name).await?;

        if !handle.ping().await? {
            return Err(ProbeError::PingRefused);
        }

        Ok(handle)
    }
}

/// Why a discovered name did not make it into the backup set. Only ever
/// logged; every variant ends in the same sticky write-off.
#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Unreachable(#[from] PeerUnreachable),
    #[error("replica answered ping with alive=false")]
    PingRefused,
}

impl From<ResolveError> for ProbeError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Registry(e) => ProbeError::Registry(e),
            ResolveError::Connect(e) => ProbeError::Connect(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{try_start_registry, RegistryServerConfig, RegistryServerHandle};

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// A replica needs a live registry to discover through, even in tests
    /// that never reach discovery. The caller keeps the handle so the
    /// registry outlives the test body.
    async fn replica_with_registry(
        port: u16,
        role: ReplicaRole,
    ) -> (RegistryServerHandle, Replica) {
        let addr = format!("127.0.0.1:{}", port).parse().unwrap();
        let handle = try_start_registry(RegistryServerConfig {
            logger: test_logger(),
            listen_addr: addr,
        })
        .await
        .unwrap();
        let registry = RegistryClient::connect(&handle.local_addr.to_string())
            .await
            .unwrap();
        let replica = Replica::new(test_logger(), ReplicaName::new(1), role, registry);

        (handle, replica)
    }

    #[tokio::test]
    async fn backup_refuses_put_and_stays_clean() {
        let (_registry, replica) = replica_with_registry(18310, ReplicaRole::Backup).await;

        let result = replica.handle_put("a".into(), "1".into()).await;

        assert!(matches!(result, Err(PutError::NotPrimary { .. })));
        assert_eq!(None, replica.handle_get("a").await);
        assert_eq!(0, replica.handle_get_state().await.len());
        assert_eq!(ReplicaRole::Backup, replica.role().await);
    }

    #[tokio::test]
    async fn primary_put_is_readable_locally() {
        let (_registry, replica) = replica_with_registry(18311, ReplicaRole::Primary).await;

        replica.handle_put("a".into(), "1".into()).await.unwrap();
        replica.handle_put("a".into(), "2".into()).await.unwrap();

        assert_eq!(Some("2".to_owned()), replica.handle_get("a").await);
    }

    #[tokio::test]
    async fn promote_flips_backup_to_primary() {
        let (_registry, replica) = replica_with_registry(18312, ReplicaRole::Backup).await;

        replica.handle_promote().await;

        assert_eq!(ReplicaRole::Primary, replica.role().await);
        replica.handle_put("a".into(), "1".into()).await.unwrap();
    }

    #[tokio::test]
    async fn promote_is_idempotent() {
        let (_registry, replica) = replica_with_registry(18313, ReplicaRole::Backup).await;
        replica.handle_promote().await;
        replica.handle_put("a".into(), "1".into()).await.unwrap();

        replica.handle_promote().await;

        assert_eq!(ReplicaRole::Primary, replica.role().await);
        assert_eq!(Some("1".to_owned()), replica.handle_get("a").await);
    }

    #[tokio::test]
    async fn push_overwrites_wholesale() {
        let (_registry, replica) = replica_with_registry(18314, ReplicaRole::Backup).await;

        let mut first = HashMap::new();
        first.insert("a".to_owned(), "1".to_owned());
        first.insert("b".to_owned(), "2".to_owned());
        replica.handle_push_full_state(first).await;

        let mut second = HashMap::new();
        second.insert("c".to_owned(), "3".to_owned());
        replica.handle_push_full_state(second).await;

        assert_eq!(None, replica.handle_get("a").await);
        assert_eq!(None, replica.handle_get("b").await);
        assert_eq!(Some("3".to_owned()), replica.handle_get("c").await);
    }

    #[tokio::test]
    async fn ping_answers_without_state() {
        let (_registry, replica) = replica_with_registry(18315, ReplicaRole::Backup).await;

        assert!(replica.handle_ping());
    }
}
