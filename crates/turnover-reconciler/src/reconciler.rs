//! The reconciler: worker thread, wake/stop protocol, blocking loads.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use turnover_model::{Entity, PeptideAnalysis, Workspace};
use turnover_store::Store;

use crate::collaborators::Collaborators;
use crate::config::ReconcilerConfig;
use crate::cursor::Cursors;
use crate::error::ReconcileError;
use crate::merge;
use crate::pass::{self, PassOutcome, PassSummary};

pub type AnalysisNode = Arc<Entity<PeptideAnalysis>>;

/// Worker lifecycle and wake signalling, guarded by `Shared::control`.
#[derive(Debug, Default)]
struct Control {
    running: bool,
    worker_alive: bool,
    /// Set by `wake()` (and by a raced pass); consumed by the worker.
    wake_pending: bool,
    /// Bumped on every wake and every committed pass; blocking loads wait
    /// for it to move.
    signal_seq: u64,
}

/// Owned by whoever is running a pass.
#[derive(Debug, Default)]
struct PassState {
    cursors: Cursors,
    /// A full load has been committed by this reconciler.
    initialized: bool,
}

#[derive(Debug, Default)]
struct Stats {
    cursors: Cursors,
    passes_completed: u64,
    passes_aborted: u64,
    passes_failed: u64,
    last_pass_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcilerStatus {
    pub running: bool,
    pub cursors: Cursors,
    pub passes_completed: u64,
    /// Passes discarded because the store changed under them.
    pub passes_aborted: u64,
    /// Passes that hit a store or lock error.
    pub passes_failed: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
}

struct Shared {
    workspace: Arc<Workspace>,
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    config: ReconcilerConfig,
    pass_state: Mutex<PassState>,
    control: Mutex<Control>,
    signal: Condvar,
    stats: Mutex<Stats>,
}

/// Result of one attempt by a blocking load.
enum Attempt {
    Resolved(BTreeMap<i64, Option<AnalysisNode>>),
    Raced,
    Failed,
}

pub struct Reconciler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        workspace: Arc<Workspace>,
        store: Arc<dyn Store>,
        config: ReconcilerConfig,
    ) -> Self {
        Self::with_collaborators(workspace, store, config, Collaborators::default())
    }

    pub fn with_collaborators(
        workspace: Arc<Workspace>,
        store: Arc<dyn Store>,
        config: ReconcilerConfig,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                workspace,
                store,
                collaborators,
                config,
                pass_state: Mutex::new(PassState::default()),
                control: Mutex::new(Control::default()),
                signal: Condvar::new(),
                stats: Mutex::new(Stats::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.shared.workspace
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.shared.config
    }

    /// Starts the background worker. Calling it while the worker is already
    /// running does nothing; the first pass runs immediately.
    pub fn start(&self) -> Result<(), ReconcileError> {
        let mut worker = self.worker.lock();
        {
            let mut control = self.shared.control.lock();
            if control.running && control.worker_alive {
                return Ok(());
            }
            control.running = true;
            control.wake_pending = true;
            self.shared.signal.notify_all();
            if control.worker_alive {
                // A stopping worker has not reached its exit check yet and
                // will keep going.
                return Ok(());
            }
            control.worker_alive = true;
        }
        if let Some(finished) = worker.take() {
            if finished.join().is_err() {
                tracing::warn!("reconciler worker panicked");
            }
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("turnover-reconciler".to_owned())
            .spawn(move || shared.run_worker())
            .map_err(|err| {
                let mut control = self.shared.control.lock();
                control.worker_alive = false;
                control.running = false;
                ReconcileError::Spawn(err)
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Asks the worker to exit after its current iteration. Does not wait.
    pub fn stop(&self) {
        let mut control = self.shared.control.lock();
        control.running = false;
        self.shared.signal.notify_all();
    }

    /// [`stop`](Self::stop), then waits for the worker thread to exit.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("reconciler worker panicked");
            }
        }
    }

    /// Cuts the current poll wait short. Never blocks on a running pass.
    pub fn wake(&self) {
        self.shared.wake();
    }

    pub fn is_running(&self) -> bool {
        let control = self.shared.control.lock();
        control.running && control.worker_alive
    }

    pub fn status(&self) -> ReconcilerStatus {
        let running = self.is_running();
        let stats = self.shared.stats.lock();
        ReconcilerStatus {
            running,
            cursors: stats.cursors,
            passes_completed: stats.passes_completed,
            passes_aborted: stats.passes_aborted,
            passes_failed: stats.passes_failed,
            last_pass_at: stats.last_pass_at,
        }
    }

    /// Runs one pass on the calling thread. Store errors are returned, not
    /// swallowed.
    pub fn run_pass(&self) -> Result<PassOutcome, ReconcileError> {
        self.shared.sweep()
    }

    /// Runs passes until one commits.
    pub fn sync(&self) -> Result<PassSummary, ReconcileError> {
        loop {
            if let PassOutcome::Complete(summary) = self.run_pass()? {
                return Ok(summary);
            }
        }
    }

    /// Returns the analysis `id`, blocking until it exists in the store and
    /// has been merged. Store failures are logged and retried; only a write
    /// lock timeout is returned.
    ///
    /// Must not be called while holding a workspace read guard.
    pub fn load_one(&self, id: i64) -> Result<AnalysisNode, ReconcileError> {
        let wanted = BTreeSet::from([id]);
        loop {
            let (attempt, seen) = self.attempt(&wanted)?;
            match attempt {
                Attempt::Resolved(mut found) => {
                    if let Some(Some(node)) = found.remove(&id) {
                        return Ok(node);
                    }
                    tracing::debug!(analysis = id, "analysis not in store yet; waiting");
                }
                Attempt::Raced => continue,
                Attempt::Failed => {}
            }
            self.shared.wait_for_signal(seen);
        }
    }

    /// Like [`load_one`](Self::load_one) but returns `None` as soon as a
    /// committed pass reports the id as absent.
    pub fn try_load_one(&self, id: i64) -> Result<Option<AnalysisNode>, ReconcileError> {
        Ok(self.load_many(&[id])?.remove(&id).flatten())
    }

    /// Resolves every id, running passes only for the ones not already in the
    /// graph. Absent ids map to `None`.
    pub fn load_many(
        &self,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, Option<AnalysisNode>>, ReconcileError> {
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        loop {
            let (attempt, seen) = self.attempt(&wanted)?;
            match attempt {
                Attempt::Resolved(found) => return Ok(found),
                Attempt::Raced => continue,
                Attempt::Failed => self.shared.wait_for_signal(seen),
            }
        }
    }

    /// Resolves what is cached and runs one probing pass for the rest. Also
    /// returns the signal sequence as of the end of the attempt, read before
    /// any other pass can commit.
    fn attempt(&self, wanted: &BTreeSet<i64>) -> Result<(Attempt, u64), ReconcileError> {
        let mut state = self.shared.pass_state.lock();
        let missing: BTreeSet<i64> = {
            let data = self.shared.workspace.acquire_read();
            wanted
                .iter()
                .copied()
                .filter(|id| !data.peptide_analyses.contains(*id))
                .collect()
        };
        let attempt = if missing.is_empty() {
            Attempt::Resolved(self.shared.lookup(wanted))
        } else {
            match self.shared.execute_pass(&mut state, &missing) {
                Ok(PassOutcome::Complete(_)) => Attempt::Resolved(self.shared.lookup(wanted)),
                Ok(PassOutcome::Incomplete) => Attempt::Raced,
                Err(err) if err.is_lock_timeout() => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "load pass failed; retrying");
                    Attempt::Failed
                }
            }
        };
        Ok((attempt, self.shared.signal_seq()))
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run_worker(&self) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "reconciler worker started"
        );
        while self.wait_for_tick() {
            match self.sweep() {
                Ok(PassOutcome::Complete(summary)) => {
                    tracing::debug!(changed = summary.changed, "pass committed");
                }
                Ok(PassOutcome::Incomplete) => self.request_retry(),
                Err(err) => {
                    tracing::warn!(error = %err, "reconciliation pass failed; retrying at the next tick");
                }
            }
        }
        tracing::info!("reconciler worker stopped");
    }

    /// Waits for a wake signal or the poll interval. Returns `false` once the
    /// worker should exit; the worker is marked dead under the same lock.
    fn wait_for_tick(&self) -> bool {
        let mut control = self.control.lock();
        if control.running && !control.wake_pending {
            self.signal.wait_while_for(
                &mut control,
                |c| c.running && !c.wake_pending,
                self.config.poll_interval(),
            );
        }
        control.wake_pending = false;
        if !control.running {
            control.worker_alive = false;
            return false;
        }
        true
    }

    fn wake(&self) {
        let mut control = self.control.lock();
        control.wake_pending = true;
        control.signal_seq = control.signal_seq.wrapping_add(1);
        self.signal.notify_all();
    }

    fn request_retry(&self) {
        let mut control = self.control.lock();
        control.wake_pending = true;
    }

    fn signal_seq(&self) -> u64 {
        self.control.lock().signal_seq
    }

    fn wait_for_signal(&self, seen: u64) {
        let mut control = self.control.lock();
        if control.signal_seq == seen {
            self.signal.wait_while_for(
                &mut control,
                |c| c.signal_seq == seen,
                self.config.poll_interval(),
            );
        }
    }

    fn lookup(&self, ids: &BTreeSet<i64>) -> BTreeMap<i64, Option<AnalysisNode>> {
        let data = self.workspace.acquire_read();
        ids.iter()
            .map(|id| (*id, data.peptide_analyses.get(*id).cloned()))
            .collect()
    }

    fn sweep(&self) -> Result<PassOutcome, ReconcileError> {
        let mut state = self.pass_state.lock();
        self.execute_pass(&mut state, &BTreeSet::new())
    }

    /// One pass plus bookkeeping. A committed pass wakes blocked loaders.
    fn execute_pass(
        &self,
        state: &mut PassState,
        probes: &BTreeSet<i64>,
    ) -> Result<PassOutcome, ReconcileError> {
        let result = self.pass(state, probes);
        {
            let mut stats = self.stats.lock();
            match &result {
                Ok(PassOutcome::Complete(_)) => {
                    stats.passes_completed += 1;
                    stats.cursors = state.cursors;
                    stats.last_pass_at = Some(Utc::now());
                }
                Ok(PassOutcome::Incomplete) => stats.passes_aborted += 1,
                Err(_) => stats.passes_failed += 1,
            }
        }
        if result.as_ref().is_ok_and(PassOutcome::is_complete) {
            let mut control = self.control.lock();
            control.signal_seq = control.signal_seq.wrapping_add(1);
            self.signal.notify_all();
        }
        result
    }

    fn pass(
        &self,
        state: &mut PassState,
        probes: &BTreeSet<i64>,
    ) -> Result<PassOutcome, ReconcileError> {
        let session = self.store.open_session()?;
        let initial = !state.initialized || !self.workspace.acquire_read().is_loaded();
        let delta = pass::fetch(&*session, &state.cursors, initial, probes)?;

        if delta.is_noop(&state.cursors) {
            tracing::trace!("nothing changed");
            return Ok(PassOutcome::Complete(PassSummary::unchanged(state.cursors)));
        }

        if let Some(record) = pass::find_race(&*session, delta.observed.change_log, &delta.snapshots)?
        {
            tracing::warn!(change_log = record.id, "store changed during the pass; discarding it");
            return Ok(PassOutcome::Incomplete);
        }

        let full_reload = delta.reload.is_some();
        let affected = delta.snapshots.len();
        let observed = delta.observed;
        let report = {
            let mut data = self
                .workspace
                .acquire_write_for(self.config.write_lock_timeout())?;
            if self.config.strict_race_check {
                if let Some(record) =
                    pass::find_race(&*session, observed.change_log, &delta.snapshots)?
                {
                    tracing::warn!(
                        change_log = record.id,
                        "store changed before the merge; discarding the pass"
                    );
                    return Ok(PassOutcome::Incomplete);
                }
            }
            let report = merge::apply(&mut data, delta);
            state.cursors.advance(&observed);
            state.initialized = true;
            report
        };

        let requery = full_reload || affected >= self.config.requery_threshold;
        if requery {
            self.collaborators.requery_pending();
        } else {
            self.collaborators
                .notify_pending_result_calculation(&report.pending_results);
            self.collaborators
                .notify_pending_chromatogram_generation(&report.pending_chromatograms);
        }

        if full_reload {
            tracing::info!(
                peptides = report.peptides,
                ms_data_files = report.ms_data_files,
                analyses = report.analyses_loaded,
                "workspace reloaded"
            );
        }
        tracing::debug!(
            pass.peptides = report.peptides,
            pass.ms_data_files = report.ms_data_files,
            pass.analyses = report.analyses_loaded,
            pass.removed = report.analyses_removed,
            pass.changed = report.changed,
            requery,
            "pass merged"
        );

        Ok(PassOutcome::Complete(PassSummary {
            full_reload,
            peptides: report.peptides,
            ms_data_files: report.ms_data_files,
            analyses_loaded: report.analyses_loaded,
            analyses_removed: report.analyses_removed,
            tombstones: report.tombstones,
            changed: report.changed,
            pending_results: report.pending_results.len(),
            pending_chromatograms: report.pending_chromatograms.len(),
            requery,
            cursors: state.cursors,
        }))
    }
}
