//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventFeed, EventRecord, SyncEvent};
use crate::transport::SyncTransport;
use drivesync_fs::{FsResult, NodeStore, RemoteApply, TrackedFs};
use drivesync_protocol::{
    normalize_path, BeginRequest, FileChange, Phase, PullRequest, PushRequest, RejectionCode,
    SessionId, SyncEnvelope, SyncMessage,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of remote changes applied locally.
    pub files_pulled: u64,
    /// Total number of paths acknowledged by the server.
    pub files_pushed: u64,
    /// Total number of conflicts encountered.
    pub conflicts_encountered: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCycleResult {
    /// Remote changes applied locally.
    pub pulled: Vec<String>,
    /// Paths the server acknowledged and whose marker was cleared.
    pub cleared: Vec<String>,
    /// Paths that diverged, downstream or upstream. Their markers stay set.
    pub conflicts: Vec<String>,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Returns true if no path diverged.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// How a conflicted path is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local node and push it over the remote copy next cycle.
    KeepLocal,
    /// Replace the local node with the remote copy and drop its marker.
    TakeRemote,
}

/// The client sync engine.
///
/// Drives one downstream-then-upstream cycle at a time against the server
/// and mirrors the server-side phase. Markers are cleared only for paths
/// the server acknowledged in the current push.
///
/// Local writes go through the shared [`TrackedFs`] and never wait on the
/// engine, including while a push is in flight.
///
/// A remote change that hits a dirty node is held back together with the
/// path. The path is neither overwritten nor pushed until
/// [`SyncEngine::resolve`] settles it.
pub struct SyncEngine<T: SyncTransport, S: NodeStore> {
    config: SyncConfig,
    transport: Arc<T>,
    fs: Arc<TrackedFs<S>>,
    phase: RwLock<Phase>,
    session: RwLock<Option<SessionId>>,
    cursor: AtomicU64,
    /// Last server revision seen per path, used as the push base.
    revisions: RwLock<HashMap<String, u64>>,
    /// Remote changes held back because the local node was dirty.
    conflicts: RwLock<HashMap<String, FileChange>>,
    cycle: Mutex<()>,
    cancelled: AtomicBool,
    events: EventFeed,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport, S: NodeStore> SyncEngine<T, S> {
    /// Creates a new sync engine over a shared tracked filesystem.
    pub fn new(config: SyncConfig, transport: T, fs: Arc<TrackedFs<S>>) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            fs,
            phase: RwLock::new(Phase::Idle),
            session: RwLock::new(None),
            cursor: AtomicU64::new(0),
            revisions: RwLock::new(HashMap::new()),
            conflicts: RwLock::new(HashMap::new()),
            cycle: Mutex::new(()),
            cancelled: AtomicBool::new(false),
            events: EventFeed::new(),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the mirrored phase.
    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// The token of the session in progress, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.read().clone()
    }

    /// Last server revision applied locally.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Last server revision seen for `path`.
    pub fn known_revision(&self, path: &str) -> Option<u64> {
        self.revisions.read().get(path).copied()
    }

    /// Paths waiting for [`SyncEngine::resolve`], sorted.
    pub fn pending_conflicts(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.conflicts.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// The tracked filesystem this engine syncs.
    pub fn fs(&self) -> &Arc<TrackedFs<S>> {
        &self.fs
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The event feed.
    pub fn events(&self) -> &EventFeed {
        &self.events
    }

    /// Subscribes to every future lifecycle event.
    pub fn subscribe(&self) -> Receiver<EventRecord> {
        self.events.subscribe()
    }

    /// Cancels the in-flight cycle at its next step, or the next cycle if
    /// none is running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: Phase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "client phase");
        }
    }

    /// Establishes the transport and moves to `IDLE`.
    ///
    /// A failed connect touches no filesystem node and is reported as an
    /// [`SyncEvent::Error`].
    pub fn connect(&self) -> SyncResult<()> {
        let _cycle = self.cycle.try_lock().ok_or(SyncError::CycleInProgress)?;

        if let Err(err) = self.transport.connect() {
            warn!(server = %self.config.server_url, error = %err, "connect failed");
            self.stats.write().last_error = Some(err.to_string());
            self.report(&err);
            return Err(err);
        }

        self.session.write().take();
        self.set_phase(Phase::Idle);
        info!(server = %self.config.server_url, "connected");
        self.events.emit(SyncEvent::Connected);
        Ok(())
    }

    /// Closes the transport and discards the session token.
    ///
    /// Safe to call while a cycle is in flight: markers already cleared stay
    /// cleared and nothing else is cleared.
    pub fn disconnect(&self) -> SyncResult<()> {
        let result = self.transport.close();
        self.session.write().take();
        self.set_phase(Phase::Idle);
        info!(server = %self.config.server_url, "disconnected");
        self.events.emit(SyncEvent::Disconnected);
        result
    }

    /// Runs one full cycle: begin, pull, apply, acknowledge, push, end.
    ///
    /// Fails with `CycleInProgress` instead of starting a second concurrent
    /// cycle. Divergent paths do not fail the cycle; they are listed in the
    /// result and reported as a `CONFLICT` error event.
    pub fn request(&self) -> SyncResult<SyncCycleResult> {
        let _cycle = self.cycle.try_lock().ok_or(SyncError::CycleInProgress)?;
        if !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if self.phase() != Phase::Idle {
            return Err(SyncError::CycleInProgress);
        }

        let result = self.run_cycle(Instant::now());
        self.cancelled.store(false, Ordering::SeqCst);

        result.map_err(|err| {
            self.fail(&err);
            err
        })
    }

    /// Performs [`SyncEngine::request`] with retry on transient errors.
    ///
    /// Locked sessions and retryable transport failures are retried with
    /// exponential backoff; a dropped transport is reconnected first.
    pub fn request_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;

                if !self.transport.is_connected() {
                    if let Err(err) = self.connect() {
                        if err.is_retryable() && attempt + 1 < retry.max_attempts {
                            last_error = Some(err);
                            continue;
                        }
                        return Err(err);
                    }
                }
            }

            match self.request() {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    debug!(attempt, error = %err, "retrying sync");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    /// Settles a path that conflicted with a remote change.
    ///
    /// `KeepLocal` adopts the remote revision as the push base, so the next
    /// cycle overwrites the remote copy. `TakeRemote` writes the remote copy
    /// locally and clears the marker. Fails with `NotConflicted` if no
    /// remote change is held back for `path`.
    pub fn resolve(&self, path: &str, resolution: Resolution) -> SyncResult<()> {
        let _cycle = self.cycle.try_lock().ok_or(SyncError::CycleInProgress)?;
        let path = normalize_path(path)?;
        let remote = self
            .conflicts
            .read()
            .get(&path)
            .cloned()
            .ok_or_else(|| SyncError::NotConflicted(path.clone()))?;

        match resolution {
            Resolution::KeepLocal => {
                if !self.fs.is_unsynced(&path)? {
                    self.fs.tracker().on_local_write(&path)?;
                }
            }
            Resolution::TakeRemote => self.fs.accept_remote(&remote)?,
        }
        self.revisions.write().insert(path.clone(), remote.revision);
        self.conflicts.write().remove(&path);

        info!(path = %path, ?resolution, revision = remote.revision, "conflict resolved");
        Ok(())
    }

    fn run_cycle(&self, start: Instant) -> SyncResult<SyncCycleResult> {
        let mut result = SyncCycleResult::default();
        self.check_cancelled()?;

        let begin = match self.exchange(SyncMessage::BeginRequest(BeginRequest {
            client: self.config.client_label.clone(),
        }))? {
            SyncMessage::BeginResponse(response) => response,
            other => return Err(unexpected("begin", &other)),
        };
        debug!(session = %begin.session_id, "session admitted");
        *self.session.write() = Some(begin.session_id);
        self.set_phase(begin.phase);

        self.check_cancelled()?;
        self.downstream(&mut result)?;

        self.check_cancelled()?;
        self.upstream(&mut result)?;

        match self.exchange(SyncMessage::EndRequest)? {
            SyncMessage::PhaseReport(phase) => self.set_phase(phase),
            other => return Err(unexpected("end", &other)),
        }
        self.session.write().take();
        self.set_phase(Phase::Idle);

        result.conflicts.sort();
        result.conflicts.dedup();
        result.duration = start.elapsed();

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.files_pulled += result.pulled.len() as u64;
            stats.files_pushed += result.cleared.len() as u64;
            stats.conflicts_encountered += result.conflicts.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        if !result.is_clean() {
            warn!(paths = ?result.conflicts, "sync finished with conflicts");
            self.events.emit(SyncEvent::Error {
                code: Some(RejectionCode::Conflict),
                message: format!("{} path(s) diverged from the server", result.conflicts.len()),
                paths: result.conflicts.clone(),
            });
        }
        info!(
            pulled = result.pulled.len(),
            cleared = result.cleared.len(),
            conflicts = result.conflicts.len(),
            "sync cycle finished"
        );
        self.events.emit(SyncEvent::Synced);
        Ok(result)
    }

    /// Pulls and applies remote changes, then acknowledges them.
    fn downstream(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        let pull = match self.exchange(SyncMessage::PullRequest(PullRequest::new(self.cursor())))? {
            SyncMessage::PullResponse(response) => response,
            other => return Err(unexpected("downstream", &other)),
        };
        self.set_phase(Phase::DownstreamActive);

        for change in &pull.changes {
            match self.fs.apply_remote(change)? {
                RemoteApply::Applied => {
                    self.revisions
                        .write()
                        .insert(change.path.clone(), change.revision);
                    result.pulled.push(change.path.clone());
                }
                RemoteApply::Conflict => {
                    debug!(path = %change.path, revision = change.revision, "downstream conflict");
                    self.conflicts
                        .write()
                        .insert(change.path.clone(), change.clone());
                    result.conflicts.push(change.path.clone());
                }
            }
        }
        self.cursor.store(pull.new_cursor, Ordering::SeqCst);

        match self.exchange(SyncMessage::DownstreamAck)? {
            SyncMessage::PhaseReport(phase) => self.set_phase(phase),
            other => return Err(unexpected("downstream ack", &other)),
        }
        Ok(())
    }

    /// Pushes the dirty set and clears what the server acknowledged.
    fn upstream(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        let mut snapshot = self.fs.snapshot_dirty()?;
        for path in self.conflicts.read().keys() {
            snapshot.exclude(path);
            result.conflicts.push(path.clone());
        }

        let changes = {
            let revisions = self.revisions.read();
            snapshot
                .paths()
                .map(|path| {
                    let base = revisions.get(path).copied().unwrap_or(0);
                    self.fs.pending_change(path, base)
                })
                .collect::<FsResult<Vec<FileChange>>>()?
        };
        let pushed = changes.len();

        let push = match self.exchange(SyncMessage::PushRequest(PushRequest::new(changes)))? {
            SyncMessage::PushResponse(response) => response,
            other => return Err(unexpected("upstream", &other)),
        };
        self.set_phase(if push.is_clean() {
            Phase::UpstreamActive
        } else {
            Phase::Conflict
        });

        let cleared = self.fs.tracker().clear(&snapshot, push.acknowledged_paths())?;
        {
            let mut revisions = self.revisions.write();
            for (path, revision) in &push.acknowledged {
                revisions.insert(path.clone(), *revision);
            }
        }
        self.cursor.store(push.new_cursor, Ordering::SeqCst);

        info!(
            pushed,
            acknowledged = push.acknowledged.len(),
            cleared = cleared.len(),
            "push acknowledged"
        );
        result.conflicts.extend(push.conflicts);
        result.cleared = cleared.clone();
        self.events.emit(SyncEvent::Completed { cleared });
        Ok(())
    }

    /// Sends one step of the current session and unwraps the reply.
    fn exchange(&self, message: SyncMessage) -> SyncResult<SyncMessage> {
        let route = message.route().unwrap_or("-");
        let envelope = SyncEnvelope::new(
            self.config.credentials.clone(),
            self.session_id(),
            message,
        );

        self.transport
            .send(&envelope)?
            .into_result()
            .map_err(|rejection| {
                debug!(route, code = %rejection.code, "step rejected");
                SyncError::Rejected(rejection)
            })
    }

    /// Puts the engine back into a usable state after a failed cycle.
    fn fail(&self, err: &SyncError) {
        self.stats.write().last_error = Some(err.to_string());
        self.report(err);

        if err.requires_reconnect() {
            warn!(error = %err, "session desynchronized, disconnecting");
            if let Err(close_err) = self.disconnect() {
                warn!(error = %close_err, "transport close failed");
            }
            return;
        }

        if self.session.read().is_some() {
            self.abandon_session();
        }
        self.set_phase(Phase::Idle);
    }

    /// Ends the half-finished session so the user is not locked out until
    /// the server reaps it.
    fn abandon_session(&self) {
        if self.transport.is_connected() {
            if let Err(err) = self.exchange(SyncMessage::EndRequest) {
                debug!(error = %err, "could not end abandoned session");
            }
        }
        self.session.write().take();
    }

    fn report(&self, err: &SyncError) {
        self.events.emit(SyncEvent::Error {
            code: err.rejection_code(),
            message: err.to_string(),
            paths: Vec::new(),
        });
    }
}

fn unexpected(step: &str, reply: &SyncMessage) -> SyncError {
    SyncError::Protocol(format!(
        "unexpected reply to {step}: message type {}",
        reply.type_code()
    ))
}
