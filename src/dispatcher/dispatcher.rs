use crate::net::ConnectError;
use crate::registry::{RegistryClient, RegistryError, ReplicaName};
use crate::replica::{PeerUnreachable, ReplicaHandle, ResolveError};
use arc_swap::ArcSwapOption;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Failover bookkeeping. Guarded by one lock so a failover's
/// promote/install/dequeue triple is atomic against concurrent failovers and
/// against the discovery scan appending.
struct FailoverState {
    /// Backups in promotion order: the head is the next candidate. Startup
    /// order first, then discovery order.
    backup_queue: VecDeque<ReplicaHandle>,
    /// Names that failed a discovery probe once. Never retried.
    ignored_names: HashSet<String>,
}

/// Routes every client request to the replica it currently believes is
/// primary, and walks the backup queue when that belief stops holding.
///
/// `current_primary` is read on every request without touching the state
/// lock; it is only ever stored while the lock is held, and always as a
/// fully-formed handle or `None`. `None` means every known backup failed
/// promotion and requests fail fast until discovery finds fresh replicas.
pub struct Dispatcher {
    logger: slog::Logger,
    registry: RegistryClient,
    current_primary: ArcSwapOption<ReplicaHandle>,
    state: Mutex<FailoverState>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No primary is installed and no queued backup could be promoted. Not
    /// necessarily permanent: a later discovery round may find new replicas.
    #[error("no replica available to serve the request")]
    Exhausted,
}

impl Dispatcher {
    pub(crate) fn new(
        logger: slog::Logger,
        registry: RegistryClient,
        initial_primary: ReplicaHandle,
        initial_backups: Vec<ReplicaHandle>,
    ) -> Self {
        Dispatcher {
            logger,
            registry,
            current_primary: ArcSwapOption::from(Some(Arc::new(initial_primary))),
            state: Mutex::new(FailoverState {
                backup_queue: initial_backups.into(),
                ignored_names: HashSet::new(),
            }),
        }
    }

    /// Route a put to the primary. `Ok(false)` is the primary-side refusal of
    /// a write sent to a non-primary: an application-level answer, reported
    /// as-is. Only an unreachable primary triggers failover.
    pub async fn put(&self, key: &str, value: &str) -> Result<bool, DispatchError> {
        loop {
            let primary = match self.current_primary.load_full() {
                Some(primary) => primary,
                None => break,
            };

            match primary.put(key, value).await {
                Ok(applied) => return Ok(applied),
                Err(err) => {
                    slog::warn!(
                        self.logger,
                        "Primary '{}' unreachable during put: {}",
                        primary.name(),
                        err
                    );
                    if !self.try_failover().await {
                        break;
                    }
                }
            }
        }

        Err(DispatchError::Exhausted)
    }

    /// Route a get to the primary, with the same failover walk as [`put`].
    ///
    /// [`put`]: Dispatcher::put
    pub async fn get(&self, key: &str) -> Result<Option<String>, DispatchError> {
        loop {
            let primary = match self.current_primary.load_full() {
                Some(primary) => primary,
                None => break,
            };

            match primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    slog::warn!(
                        self.logger,
                        "Primary '{}' unreachable during get: {}",
                        primary.name(),
                        err
                    );
                    if !self.try_failover().await {
                        break;
                    }
                }
            }
        }

        Err(DispatchError::Exhausted)
    }

    /// Registry name of the replica currently installed as primary.
    pub fn primary_name(&self) -> Option<String> {
        self.current_primary
            .load()
            .as_ref()
            .map(|primary| primary.name().to_owned())
    }

    /// Names of the queued backups, next candidate first. A diagnostic view;
    /// the queue can change the moment this returns.
    pub async fn backup_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .backup_queue
            .iter()
            .map(|backup| backup.name().to_owned())
            .collect()
    }

    /// One failover attempt against the queue head. Returns false when the
    /// queue is empty, which uninstalls the primary so later requests fail
    /// fast instead of re-dialing a corpse.
    ///
    /// A candidate that fails promotion is dropped from the queue for good
    /// and the caller's request loop comes back around for the next one.
    async fn try_failover(&self) -> bool {
        let candidate = {
            let state = self.state.lock().await;
            match state.backup_queue.front().cloned() {
                Some(candidate) => candidate,
                None => {
                    slog::error!(self.logger, "No backups left to promote; giving up primary");
                    self.current_primary.store(None);
                    return false;
                }
            }
        };

        match self.failover_to(&candidate).await {
            Ok(()) => true,
            Err(err) => {
                slog::error!(
                    self.logger,
                    "Dropping backup '{}' after failed promotion: {}",
                    candidate.name(),
                    err
                );
                let mut state = self.state.lock().await;
                state.backup_queue.retain(|backup| backup != &candidate);
                true
            }
        }
    }

    /// Promote `candidate`, install it as primary, remove it from the queue.
    /// All under the state lock: two request workers racing through failover
    /// both peek the same head, and promotion being idempotent turns the
    /// second attempt into a no-op.
    async fn failover_to(&self, candidate: &ReplicaHandle) -> Result<(), PeerUnreachable> {
        let mut state = self.state.lock().await;
        slog::info!(self.logger, "Promoting backup '{}'", candidate.name());

        candidate.promote_to_primary().await?;

        self.current_primary
            .store(Some(Arc::new(candidate.clone())));
        state.backup_queue.retain(|backup| backup != candidate);

        slog::info!(self.logger, "Failover to '{}' complete", candidate.name());
        Ok(())
    }

    /// One membership discovery pass: adopt every registry name that matches
    /// the replica convention and is not the primary, already queued, or
    /// written off. Candidate failures write that name off and move on; they
    /// never abort the pass, and nothing here returns an error because the
    /// discovery loop must outlive any scan.
    ///
    /// Skipped entirely while no primary is installed: a newcomer must be
    /// seeded from the primary's state before it may serve, and without a
    /// primary there is nothing to seed from.
    pub(crate) async fn scan_for_new_backups(&self) {
        let primary = match self.current_primary.load_full() {
            Some(primary) => primary,
            None => return,
        };

        let names = match self.registry.list_names().await {
            Ok(names) => names,
            Err(err) => {
                slog::warn!(self.logger, "Registry listing failed: {}", err);
                return;
            }
        };

        for name in names {
            if !ReplicaName::matches_convention(&name) {
                continue;
            }
            if self.is_known_or_ignored(&primary, &name).await {
                continue;
            }

            match self.adopt_backup(&primary, &name).await {
                Ok(handle) => {
                    let mut state = self.state.lock().await;
                    state.backup_queue.push_back(handle);
                    slog::info!(self.logger, "Adopted new backup '{}'", name);
                }
                Err(err) => {
                    let mut state = self.state.lock().await;
                    state.ignored_names.insert(name.clone());
                    slog::warn!(
                        self.logger,
                        "Writing off replica '{}' after failed adoption: {}",
                        name,
                        err
                    );
                }
            }
        }
    }

    async fn is_known_or_ignored(&self, primary: &ReplicaHandle, name: &str) -> bool {
        if primary.name() == name {
            return true;
        }

        let state = self.state.lock().await;
        state.ignored_names.contains(name)
            || state
                .backup_queue
                .iter()
                .any(|backup| backup.name() == name)
    }

    /// Resolve a candidate, check it is alive, and seed it with the primary's
    /// current state. Only a seeded backup is safe to queue: promotion never
    /// copies data, so whatever the candidate holds at queue time is what it
    /// would serve if promoted.
    ///
    /// Known gap: a put that lands on the primary between `get_state` here
    /// and the primary's next fan-out is not in the seed snapshot, so the
    /// newcomer serves stale data until that next put pushes to it. Closing
    /// it would need the primary to learn about adoptions synchronously.
    async fn adopt_backup(
        &self,
        primary: &ReplicaHandle,
        name: &str,
    ) -> Result<ReplicaHandle, AdoptError> {
        let handle = ReplicaHandle::resolve(&self.registry, name).await?;

        if !handle.ping().await? {
            return Err(AdoptError::PingRefused);
        }

        let snapshot = primary.get_state().await?;
        handle.push_full_state(&snapshot).await?;

        Ok(handle)
    }
}

/// Why a discovered name was not adopted. Only ever logged; every variant
/// ends in the same sticky write-off.
#[derive(Debug, thiserror::Error)]
enum AdoptError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Unreachable(#[from] PeerUnreachable),
    #[error("replica answered ping with alive=false")]
    PingRefused,
}

impl From<ResolveError> for AdoptError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Registry(e) => AdoptError::Registry(e),
            ResolveError::Connect(e) => AdoptError::Connect(e),
        }
    }
}
