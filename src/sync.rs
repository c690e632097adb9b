//! Replica state machine.
//!
//! Owns the local mirror of every server and decides, per envelope, whether
//! to mutate it directly (deltas), buffer into an in-flight full sync, or
//! promote a completed sync. Readers only ever get an `Arc` of a finished
//! replica; a sync in progress never shows up half-applied, apart from the
//! first-contact mirroring described on [`ReplicaStateMachine`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::Entity;
use crate::protocol::{DeltaUpdate, Envelope};

/// Immutable, shareable view of every known server keyed by id.
pub type Replica = Arc<BTreeMap<String, Entity>>;

/// Cancellable deadline armed by `full_sync_start`.
///
/// The token lives inside the [`SyncSession`]; every transition that ends the
/// session drops it, so a deadline can never fire against a later session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutToken {
    id: u64,
    deadline: Instant,
}

impl TimeoutToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Bookkeeping for one outstanding full sync.
#[derive(Debug)]
pub struct SyncSession {
    expected: usize,
    received: usize,
    buffer: BTreeMap<String, Entity>,
    started_at: Instant,
    timeout: TimeoutToken,
}

impl SyncSession {
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn timeout(&self) -> TimeoutToken {
        self.timeout
    }
}

/// Why the last full sync did not promote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    Timeout { received: usize, expected: usize },
    CountMismatch { received: usize, expected: usize },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Timeout { received, expected } => {
                write!(f, "Sync timeout: received {received}/{expected} servers")
            }
            SyncError::CountMismatch { received, expected } => {
                write!(f, "Sync incomplete: received {received}/{expected} servers")
            }
        }
    }
}

/// What consumers see of the sync machinery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub running: bool,
    pub received: usize,
    pub expected: usize,
    pub error: Option<SyncError>,
    pub last_completed: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// One-line status: progress, the last error, or time since last sync.
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        if let Some(error) = &self.error {
            return error.to_string();
        }
        if self.running {
            return format!("Syncing {}/{}", self.received, self.expected);
        }
        match self.last_completed {
            Some(at) => format!("last sync: {}", format_time_since(at, now)),
            None => "waiting for first sync".to_string(),
        }
    }
}

/// Relative age of `then`, e.g. `42s ago`, `3m ago`, `5h ago`.
/// Older than a day falls back to the local wall-clock time.
pub fn format_time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let mins = secs / 60;
    let hours = mins / 60;
    if secs < 60 {
        format!("{secs}s ago")
    } else if mins < 60 {
        format!("{mins}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else {
        then.with_timezone(&Local).format("%H:%M:%S").to_string()
    }
}

/// Which part of the replica an envelope touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaChange {
    /// Replica untouched (status may still have changed).
    None,
    /// Individual servers were upserted or removed.
    Entities {
        changed: Vec<String>,
        removed: Vec<String>,
    },
    /// Replica was swapped wholesale.
    Replaced,
}

impl ReplicaChange {
    pub fn is_none(&self) -> bool {
        matches!(self, ReplicaChange::None)
    }
}

/// Single-writer owner of the replica.
///
/// Until the first `full_sync_complete` this client instance has ever seen,
/// `server_update`s are mirrored into the replica as they arrive so a cold
/// start shows partial data instead of a blank screen. Later re-syncs leave
/// the replica alone until they complete.
pub struct ReplicaStateMachine {
    replica: Replica,
    session: Option<SyncSession>,
    first_contact: bool,
    last_error: Option<SyncError>,
    last_completed: Option<DateTime<Utc>>,
    sync_timeout: Duration,
    next_token: u64,
}

impl ReplicaStateMachine {
    pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
    /// Stand-in deadline for timeouts too large to add to an `Instant`.
    const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

    pub fn new(sync_timeout: Duration) -> Self {
        Self {
            replica: Arc::new(BTreeMap::new()),
            session: None,
            first_contact: true,
            last_error: None,
            last_completed: None,
            sync_timeout,
            next_token: 0,
        }
    }

    /// Current consistent replica. Cheap to clone and never mutated in place
    /// once handed out.
    pub fn replica(&self) -> Replica {
        Arc::clone(&self.replica)
    }

    pub fn is_syncing(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&SyncSession> {
        self.session.as_ref()
    }

    pub fn is_first_contact(&self) -> bool {
        self.first_contact
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            running: self.session.is_some(),
            received: self.session.as_ref().map_or(0, |s| s.received),
            expected: self.session.as_ref().map_or(0, |s| s.expected),
            error: self.last_error,
            last_completed: self.last_completed,
        }
    }

    /// Deadline of the armed sync timeout, if a full sync is outstanding.
    pub fn deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.timeout.deadline)
    }

    /// A transport came up. Any half-received sync belongs to the old
    /// connection and is dropped; the replica is kept.
    pub fn on_connected(&mut self) {
        if let Some(session) = self.end_session() {
            debug!(
                received = session.received,
                expected = session.expected,
                "discarding sync session left over from previous connection"
            );
        }
    }

    /// The transport dropped. Cancels the timeout, clears the sync session and
    /// its error; the replica survives until the next full sync replaces it.
    pub fn on_transport_lost(&mut self) {
        if let Some(session) = self.end_session() {
            info!(
                received = session.received,
                expected = session.expected,
                "transport lost mid-sync; buffer discarded"
            );
        }
        self.last_error = None;
    }

    /// Fire the sync timeout if its deadline has passed. Returns true when a
    /// session was abandoned.
    pub fn fire_timeout(&mut self, now: Instant) -> bool {
        let expired = self
            .session
            .as_ref()
            .is_some_and(|s| now >= s.timeout.deadline);
        if !expired {
            return false;
        }
        let Some(session) = self.end_session() else {
            return false;
        };
        let error = SyncError::Timeout {
            received: session.received,
            expected: session.expected,
        };
        warn!(token = session.timeout.id, "{error}");
        self.last_error = Some(error);
        true
    }

    /// Apply one decoded envelope.
    pub fn apply(&mut self, envelope: Envelope, now: Instant) -> ReplicaChange {
        match envelope {
            Envelope::FullSyncStart { total_servers } => {
                self.start_sync(total_servers, now);
                ReplicaChange::None
            }
            Envelope::ServerUpdate {
                server_id,
                server_data,
            } => self.buffer_update(server_id, server_data),
            Envelope::FullSyncComplete => self.complete_sync(),
            Envelope::DeltaUpdate(delta) => self.apply_delta(delta),
            Envelope::FullSnapshot { servers } => self.apply_snapshot(servers),
            Envelope::Unknown { kind } => {
                debug!(kind = %kind, "ignoring unknown envelope type");
                ReplicaChange::None
            }
        }
    }

    fn start_sync(&mut self, expected: usize, now: Instant) {
        if let Some(previous) = self.end_session() {
            debug!(
                received = previous.received,
                expected = previous.expected,
                "full sync restarted before completion"
            );
        }
        self.next_token += 1;
        let timeout = TimeoutToken {
            id: self.next_token,
            deadline: now
                .checked_add(self.sync_timeout)
                .unwrap_or_else(|| now + Self::FAR_FUTURE),
        };
        self.session = Some(SyncSession {
            expected,
            received: 0,
            buffer: BTreeMap::new(),
            started_at: now,
            timeout,
        });
        self.last_error = None;
        info!(expected, token = timeout.id, "full sync started");
    }

    fn buffer_update(&mut self, server_id: String, server_data: Entity) -> ReplicaChange {
        let Some(session) = self.session.as_mut() else {
            debug!(server_id = %server_id, "server_update outside a full sync; dropped");
            return ReplicaChange::None;
        };
        session.received += 1;
        if !self.first_contact {
            session.buffer.insert(server_id, server_data);
            return ReplicaChange::None;
        }
        session
            .buffer
            .insert(server_id.clone(), server_data.clone());
        Arc::make_mut(&mut self.replica).insert(server_id.clone(), server_data);
        ReplicaChange::Entities {
            changed: vec![server_id],
            removed: Vec::new(),
        }
    }

    fn complete_sync(&mut self) -> ReplicaChange {
        let Some(session) = self.end_session() else {
            debug!("full_sync_complete without an active sync; ignored");
            return ReplicaChange::None;
        };
        self.first_contact = false;
        if session.received != session.expected {
            let error = SyncError::CountMismatch {
                received: session.received,
                expected: session.expected,
            };
            warn!("{error}");
            self.last_error = Some(error);
            return ReplicaChange::None;
        }
        self.replica = Arc::new(session.buffer);
        self.last_error = None;
        self.last_completed = Some(Utc::now());
        info!(
            servers = self.replica.len(),
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "full sync completed"
        );
        ReplicaChange::Replaced
    }

    fn apply_delta(&mut self, delta: DeltaUpdate) -> ReplicaChange {
        if let Some(session) = &self.session {
            debug!(
                received = session.received,
                expected = session.expected,
                "delta_update during full sync; discarded"
            );
            return ReplicaChange::None;
        }
        let changed_servers = delta.changed_servers.unwrap_or_default();
        let removed_servers = delta.removed_servers.unwrap_or_default();
        if changed_servers.is_empty() && removed_servers.is_empty() {
            return ReplicaChange::None;
        }

        let replica = Arc::make_mut(&mut self.replica);
        let mut changed = Vec::with_capacity(changed_servers.len());
        for (id, entity) in changed_servers {
            replica.insert(id.clone(), entity);
            changed.push(id);
        }
        let mut removed = Vec::with_capacity(removed_servers.len());
        for id in removed_servers {
            if replica.remove(&id).is_some() {
                removed.push(id);
            }
        }
        changed.sort();
        debug!(
            changed = changed.len(),
            removed = removed.len(),
            timestamp = ?delta.timestamp,
            "delta update applied"
        );
        ReplicaChange::Entities { changed, removed }
    }

    fn apply_snapshot(
        &mut self,
        servers: std::collections::HashMap<String, Entity>,
    ) -> ReplicaChange {
        if let Some(session) = self.end_session() {
            info!(
                received = session.received,
                expected = session.expected,
                "one-shot snapshot supersedes in-flight sync"
            );
        }
        self.replica = Arc::new(servers.into_iter().collect());
        self.first_contact = false;
        self.last_error = None;
        self.last_completed = Some(Utc::now());
        info!(servers = self.replica.len(), "full snapshot applied");
        ReplicaChange::Replaced
    }

    /// Remove the session, dropping its timeout token with it.
    fn end_session(&mut self) -> Option<SyncSession> {
        self.session.take()
    }
}

impl Default for ReplicaStateMachine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SYNC_TIMEOUT)
    }
}
