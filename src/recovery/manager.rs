//! Recovery owner
//!
//! `RecoveryManager` owns every live attempt and the driver that advances
//! them. It:
//! - starts one attempt per crashed server at a time, with increasing ids
//! - routes master reports to the attempt named by the master's busy marker
//! - hands recovered tablets to their new owners
//! - retires finished attempts
//! - postpones retries of incomplete attempts to the next command cycle
//!
//! Attempts report back through `RecoveryLedger`, which only records what
//! happened; the manager applies an attempt's entries once its step has
//! returned. Each attempt's step runs as its own future, so an attempt waiting
//! on a silent peer holds back neither commands nor other attempts. Master
//! reports for an attempt whose step is in flight are held and delivered when
//! the step returns.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::coordinator::{Recovery, RecoveryContext, RecoveryOwner};
use super::errors::{RecoveryError, RecoveryResult};
use super::task_queue::TaskQueue;
use crate::cluster::{RecoveryId, ServerChangeEvent, ServerId, Service, Tablet, TabletStatus};
use crate::observability::{Logger, MetricsSnapshot, RecoveryEvent};

/// Work items for the manager's command loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryCommand {
    /// Recover a crashed server
    StartRecovery { crashed_server_id: ServerId },
    /// A recovery master finished its partition
    MasterFinished { master_id: ServerId, success: bool },
    /// Membership changes are queued in the cluster view
    MembershipChanged,
    /// Stop the loop
    Shutdown,
}

/// How a finished attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub recovery_id: RecoveryId,
    pub crashed_server_id: ServerId,
    pub completely_successful: bool,
    /// Ended before any master was assigned
    pub aborted: bool,
    /// Tablets each successful master now owns
    pub recovered: Vec<(ServerId, Vec<Tablet>)>,
}

impl RecoveryOutcome {
    fn of(recovery: &Recovery) -> Self {
        Self {
            recovery_id: recovery.recovery_id(),
            crashed_server_id: recovery.crashed_server_id(),
            completely_successful: recovery.was_completely_successful(),
            aborted: recovery.failure().is_some(),
            recovered: recovery
                .recovered_partitions()
                .into_iter()
                .map(|(master_id, partition)| (master_id, partition.tablets.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    finished: Vec<RecoveryOutcome>,
    retired: Vec<RecoveryId>,
}

/// Owner callbacks, buffered until the manager applies them
#[derive(Debug, Default)]
pub struct RecoveryLedger {
    state: Mutex<LedgerState>,
}

impl RecoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take everything recorded so far.
    pub fn take(&self) -> (Vec<RecoveryOutcome>, Vec<RecoveryId>) {
        let mut state = self.lock();
        (
            std::mem::take(&mut state.finished),
            std::mem::take(&mut state.retired),
        )
    }
}

impl RecoveryOwner for RecoveryLedger {
    fn recovery_finished(&self, recovery: &Recovery) {
        self.lock().finished.push(RecoveryOutcome::of(recovery));
    }

    fn destroy_and_free_recovery(&self, recovery: &Recovery) {
        self.lock().retired.push(recovery.recovery_id());
    }
}

/// Owns and drives every recovery attempt
pub struct RecoveryManager {
    ctx: RecoveryContext,
    ledger: Arc<RecoveryLedger>,
    queue: TaskQueue<RecoveryId, Recovery>,
    active: BTreeMap<ServerId, RecoveryId>,
    deferred: BTreeSet<ServerId>,
    next_recovery_id: RecoveryId,
    outcomes: Vec<RecoveryOutcome>,
    held_reports: BTreeMap<RecoveryId, Vec<(ServerId, bool)>>,
    pending_outcomes: Vec<RecoveryOutcome>,
    pending_retired: Vec<RecoveryId>,
}

impl RecoveryManager {
    pub fn new(ctx: RecoveryContext) -> Self {
        Self {
            ctx,
            ledger: Arc::new(RecoveryLedger::new()),
            queue: TaskQueue::new(),
            active: BTreeMap::new(),
            deferred: BTreeSet::new(),
            next_recovery_id: RecoveryId::new(1),
            outcomes: Vec::new(),
            held_reports: BTreeMap::new(),
            pending_outcomes: Vec::new(),
            pending_retired: Vec::new(),
        }
    }

    pub fn context(&self) -> &RecoveryContext {
        &self.ctx
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// An attempt between steps. Attempts with a step in flight are not visible.
    pub fn recovery(&self, recovery_id: RecoveryId) -> Option<&Recovery> {
        self.queue.get(&recovery_id)
    }

    /// The live attempt for a crashed server, if any.
    pub fn active_recovery(&self, crashed_server_id: ServerId) -> Option<&Recovery> {
        let recovery_id = self.active.get(&crashed_server_id)?;
        self.queue.get(recovery_id)
    }

    pub fn active_recoveries(&self) -> usize {
        self.queue.len()
    }

    /// Crashed servers waiting for a retry on the next command cycle.
    pub fn deferred(&self) -> Vec<ServerId> {
        self.deferred.iter().copied().collect()
    }

    /// Every finished attempt, oldest first.
    pub fn outcomes(&self) -> &[RecoveryOutcome] {
        &self.outcomes
    }

    // =========================================================================
    // ATTEMPTS
    // =========================================================================

    /// Queue a new attempt for a crashed server.
    ///
    /// Returns `None` if an attempt for that server is still live.
    pub fn start_recovery(&mut self, crashed_server_id: ServerId) -> Option<RecoveryId> {
        if self.active.contains_key(&crashed_server_id) {
            return None;
        }
        self.deferred.remove(&crashed_server_id);
        self.ctx
            .tablets
            .set_status_for_server(crashed_server_id, TabletStatus::Recovering);

        let recovery_id = self.next_recovery_id;
        self.next_recovery_id = recovery_id.next();

        let owner: Arc<dyn RecoveryOwner> = self.ledger.clone();
        let mut recovery = Recovery::new(
            self.ctx.clone(),
            recovery_id,
            crashed_server_id,
            Some(owner),
        );
        recovery.schedule();
        self.queue.insert(recovery_id, recovery);
        self.active.insert(crashed_server_id, recovery_id);

        Logger::info(
            RecoveryEvent::AttemptScheduled,
            &[
                ("recovery_id", &recovery_id.to_string()),
                ("crashed_server", &crashed_server_id.to_string()),
            ],
        );
        Some(recovery_id)
    }

    /// Start every retry postponed by the previous cycle.
    pub fn retry_deferred(&mut self) -> Vec<RecoveryId> {
        let pending: Vec<ServerId> = std::mem::take(&mut self.deferred).into_iter().collect();
        pending
            .into_iter()
            .filter_map(|crashed_server_id| self.start_recovery(crashed_server_id))
            .collect()
    }

    /// Route a master's report to the attempt it is busy for.
    ///
    /// Returns false if the report changed nothing. A report held for an
    /// attempt whose step is in flight counts as accepted.
    pub fn recovery_master_finished(
        &mut self,
        master_id: ServerId,
        success: bool,
    ) -> RecoveryResult<bool> {
        let Some(recovery_id) = self.ctx.cluster.assignment(master_id).recovery_id() else {
            Logger::warn(
                RecoveryEvent::UnexpectedMasterReport,
                &[
                    ("master", &master_id.to_string()),
                    ("reason", "master is not busy with any recovery"),
                ],
            );
            return Ok(false);
        };
        let changed = self.route_report(recovery_id, master_id, success)?;
        self.apply_ledger();
        Ok(changed)
    }

    fn route_report(
        &mut self,
        recovery_id: RecoveryId,
        master_id: ServerId,
        success: bool,
    ) -> RecoveryResult<bool> {
        if let Some(recovery) = self.queue.get_mut(&recovery_id) {
            return Ok(recovery.recovery_master_finished(master_id, success));
        }
        if !self.queue.is_running(&recovery_id) {
            return Err(RecoveryError::UnknownRecovery(recovery_id));
        }
        Logger::trace(
            RecoveryEvent::MasterReportHeld,
            &[
                ("recovery_id", &recovery_id.to_string()),
                ("master", &master_id.to_string()),
            ],
        );
        self.held_reports
            .entry(recovery_id)
            .or_default()
            .push((master_id, success));
        Ok(true)
    }

    /// Apply queued membership changes.
    ///
    /// A crashed server fails whatever partition it was rebuilding, and a
    /// crashed master gets an attempt of its own.
    pub fn handle_membership_changes(&mut self) -> usize {
        let changes = self.ctx.cluster.drain_changes();
        for (details, event) in &changes {
            if *event != ServerChangeEvent::Crashed {
                continue;
            }
            let server_id = details.server_id;
            Logger::warn(
                RecoveryEvent::ServerCrashed,
                &[("server", &server_id.to_string())],
            );

            if let Some(recovery_id) = self.ctx.cluster.assignment(server_id).recovery_id() {
                // A marker for an attempt that is already gone has nothing to fail.
                let _ = self.route_report(recovery_id, server_id, false);
            }
            if details.services.has(Service::Master) {
                self.start_recovery(server_id);
            }
        }
        self.apply_ledger();
        changes.len()
    }

    /// Apply ledger entries of attempts whose step has returned.
    fn apply_ledger(&mut self) {
        let (finished, retired) = self.ledger.take();
        self.pending_outcomes.extend(finished);
        self.pending_retired.extend(retired);

        let (finished, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_outcomes)
            .into_iter()
            .partition(|outcome| !self.queue.is_running(&outcome.recovery_id));
        self.pending_outcomes = waiting;
        let (retired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_retired)
            .into_iter()
            .partition(|recovery_id| !self.queue.is_running(recovery_id));
        self.pending_retired = waiting;

        for outcome in finished {
            for (master_id, tablets) in &outcome.recovered {
                for tablet in tablets {
                    self.ctx.tablets.complete_recovery(tablet, *master_id);
                }
            }
            if !outcome.completely_successful {
                self.deferred.insert(outcome.crashed_server_id);
                Logger::info(
                    RecoveryEvent::AttemptDeferred,
                    &[
                        ("recovery_id", &outcome.recovery_id.to_string()),
                        ("crashed_server", &outcome.crashed_server_id.to_string()),
                    ],
                );
            }
            self.outcomes.push(outcome);
        }

        for recovery_id in retired {
            self.held_reports.remove(&recovery_id);
            let Some(recovery) = self.queue.remove(&recovery_id) else {
                continue;
            };
            let crashed_server_id = recovery.crashed_server_id();
            if self.active.get(&crashed_server_id) == Some(&recovery_id) {
                self.active.remove(&crashed_server_id);
            }
            Logger::info(
                RecoveryEvent::AttemptRetired,
                &[
                    ("recovery_id", &recovery_id.to_string()),
                    ("crashed_server", &crashed_server_id.to_string()),
                    ("elapsed_ms", &recovery.elapsed().num_milliseconds().to_string()),
                ],
            );
        }
    }

    // =========================================================================
    // DRIVER
    // =========================================================================

    /// Deliver held reports to an attempt whose step just returned, then
    /// apply what the ledger recorded.
    fn step_finished(&mut self, recovery_id: RecoveryId) {
        let held = self.held_reports.remove(&recovery_id).unwrap_or_default();
        if let Some(recovery) = self.queue.get_mut(&recovery_id) {
            for (master_id, success) in held {
                recovery.recovery_master_finished(master_id, success);
            }
        }
        self.apply_ledger();
    }

    /// Advance attempts until none is scheduled or running; returns the
    /// number of steps performed.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        loop {
            self.queue.launch_ready();
            let Some(recovery_id) = self.queue.next_finished().await else {
                break;
            };
            self.step_finished(recovery_id);
            steps += 1;
        }
        steps
    }

    /// Apply one command. Returns false on shutdown.
    pub fn apply(&mut self, command: RecoveryCommand) -> bool {
        match command {
            RecoveryCommand::StartRecovery { crashed_server_id } => {
                self.start_recovery(crashed_server_id);
            }
            RecoveryCommand::MasterFinished { master_id, success } => {
                if let Err(err) = self.recovery_master_finished(master_id, success) {
                    Logger::warn(
                        RecoveryEvent::UnexpectedMasterReport,
                        &[
                            ("master", &master_id.to_string()),
                            ("reason", &err.to_string()),
                        ],
                    );
                }
            }
            RecoveryCommand::MembershipChanged => {
                self.handle_membership_changes();
            }
            RecoveryCommand::Shutdown => return false,
        }
        true
    }

    /// Consume commands until shutdown or until every sender is gone.
    ///
    /// Commands and attempt steps are served as they arrive. Each command
    /// first restarts deferred attempts, then applies. Attempts still in
    /// flight at shutdown are left where they are. Returns the manager for
    /// inspection.
    pub async fn run(mut self, mut commands: mpsc::Receiver<RecoveryCommand>) -> Self {
        loop {
            self.queue.launch_ready();
            let running = self.queue.has_running();
            tokio::select! {
                Some(recovery_id) = self.queue.next_finished(), if running => {
                    self.step_finished(recovery_id);
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.retry_deferred();
                    if !self.apply(command) {
                        break;
                    }
                }
            }
        }
        self
    }
}
