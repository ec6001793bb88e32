//! Execution engine - walks a plan graph in dependency order on a bounded
//! worker pool, applying the failure policy

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

use crate::context::{ApplyContext, Connection, NoProgress, ProgressCallback};
use crate::error::{ExecuteError, StepError};
use crate::graph::{PlanGraph, PlannedStep};
use crate::report::{ExecutionRecord, RunReport, SkipReason};
use crate::types::{ExecuteOptions, FailurePolicy, StepStatus};

type Completion = (usize, Result<String, StepError>);

/// Execute a plan graph against a connection
///
/// Steps with every precondition `succeeded` are queued; at most
/// `opts.jobs` run at once. Step failures are recorded on the report and
/// never returned as errors; only a malformed graph or a worker pool that
/// cannot be created prevents the run from starting.
///
/// # Arguments
/// * `graph` - The plan to run; owned by this run and discarded after
/// * `connection` - Connection to the target host
/// * `opts` - Concurrency, failure policy, timeout and cancellation
/// * `progress` - Progress callback
pub fn execute<P>(
    graph: PlanGraph,
    connection: Arc<dyn Connection>,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<RunReport, ExecuteError>
where
    P: ProgressCallback + ?Sized,
{
    let order = graph.topological_order()?;
    let jobs = opts.jobs.max(1);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("step-worker-{i}"))
        .build()?;

    log::debug!(
        "Executing {} steps on {} (jobs={}, policy={})",
        graph.len(),
        connection.host(),
        jobs,
        opts.policy
    );

    let mut run = Run::new(&graph, &order, opts, progress);
    run.progress.on_run_start(graph.len());
    run.drive(&pool, &connection, jobs);
    run.skip_remaining();
    if opts.policy == FailurePolicy::RollbackOnFailure && run.first_failure.is_some() {
        run.rollback(connection.as_ref());
    }

    let report = run.finish();
    progress.on_run_complete(&report);
    Ok(report)
}

/// Simple execution without callbacks
pub fn execute_simple(
    graph: PlanGraph,
    connection: Arc<dyn Connection>,
    opts: &ExecuteOptions,
) -> Result<RunReport, ExecuteError> {
    execute(graph, connection, opts, &mut NoProgress)
}

/// Strictly increasing timestamps for one run, so that a step's terminal
/// transition always orders before its dependents' `running` transition
struct RunClock {
    last: DateTime<Utc>,
}

impl RunClock {
    fn new() -> Self {
        Self {
            last: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.last = if now > self.last {
            now
        } else {
            self.last + chrono::Duration::nanoseconds(1)
        };
        self.last
    }
}

/// Mutable state of one run, owned by the coordinating thread
struct Run<'a, P: ?Sized> {
    nodes: &'a [PlannedStep],
    topo: Vec<usize>,
    preconditions: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    records: Vec<ExecutionRecord>,
    completion: Vec<usize>,
    ready: VecDeque<usize>,
    /// Dispatched steps and their deadline
    in_flight: HashMap<usize, Option<Instant>>,
    /// Steps already failed by timeout whose worker has not returned; each
    /// still holds a pool thread
    abandoned: HashSet<usize>,
    first_failure: Option<usize>,
    cancelled: bool,
    clock: RunClock,
    started_at: DateTime<Utc>,
    opts: &'a ExecuteOptions,
    progress: &'a mut P,
}

impl<'a, P: ProgressCallback + ?Sized> Run<'a, P> {
    fn new(
        graph: &'a PlanGraph,
        order: &[String],
        opts: &'a ExecuteOptions,
        progress: &'a mut P,
    ) -> Self {
        let nodes = graph.nodes();
        let position: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id(), i))
            .collect();
        let topo = order.iter().filter_map(|id| position.get(id).copied()).collect();
        let preconditions = graph.preconditions_by_index();
        let ready = (0..nodes.len())
            .filter(|&i| preconditions[i].is_empty())
            .collect();
        let mut clock = RunClock::new();
        let started_at = clock.tick();

        Self {
            nodes,
            topo,
            preconditions,
            dependents: graph.dependents_by_index(),
            records: nodes
                .iter()
                .map(|n| ExecutionRecord::pending(n.id(), n.step.description()))
                .collect(),
            completion: Vec::new(),
            ready,
            in_flight: HashMap::new(),
            abandoned: HashSet::new(),
            first_failure: None,
            cancelled: false,
            clock,
            started_at,
            opts,
            progress,
        }
    }

    /// Main scheduling loop: dispatch, then wait for a completion or deadline
    ///
    /// Returns only once every worker has reported back, timed out ones
    /// included, so no step body runs after the run is over.
    fn drive(&mut self, pool: &rayon::ThreadPool, connection: &Arc<dyn Connection>, jobs: usize) {
        let (tx, rx) = mpsc::channel::<Completion>();

        loop {
            if self.opts.cancel.is_cancelled() && !self.cancelled {
                log::debug!("Run cancelled; {} queued steps will be skipped", self.ready.len());
                self.cancelled = true;
                self.ready.clear();
            }

            while self.busy() < jobs {
                let Some(i) = self.ready.pop_front() else {
                    break;
                };
                self.dispatch(i, pool, connection, &tx);
            }

            if self.busy() == 0 {
                break;
            }

            match self.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok((i, result)) => self.complete(i, result),
                        Err(RecvTimeoutError::Timeout) => self.expire_deadlines(),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok((i, result)) => self.complete(i, result),
                    Err(_) => break,
                },
            }
        }
    }

    fn dispatch(
        &mut self,
        i: usize,
        pool: &rayon::ThreadPool,
        connection: &Arc<dyn Connection>,
        tx: &mpsc::Sender<Completion>,
    ) {
        let record = &mut self.records[i];
        record.status = StepStatus::Running;
        record.started_at = Some(self.clock.tick());
        log::debug!("Running step {}", record.step_id);
        self.progress
            .on_step_start(&record.step_id, &record.description);

        let deadline = self.opts.step_timeout.map(|t| Instant::now() + t);
        self.in_flight.insert(i, deadline);

        let step = Arc::clone(&self.nodes[i].step);
        let connection = Arc::clone(connection);
        let tx = tx.clone();
        let timeout = self.opts.step_timeout;
        let verbose = self.opts.verbose;

        pool.spawn(move || {
            let ctx = ApplyContext {
                connection: connection.as_ref(),
                timeout,
                verbose,
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| step.apply(&ctx)))
                .unwrap_or_else(|payload| {
                    Err(StepError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });
            // The coordinator may have stopped listening after a timeout
            let _ = tx.send((i, result));
        });
    }

    fn busy(&self) -> usize {
        self.in_flight.len() + self.abandoned.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().flatten().min().copied()
    }

    fn expire_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<usize> = self
            .in_flight
            .iter()
            .filter(|(_, deadline)| deadline.is_some_and(|d| d <= now))
            .map(|(&i, _)| i)
            .collect();

        for i in expired {
            self.in_flight.remove(&i);
            self.abandoned.insert(i);
            let after = self.opts.step_timeout.unwrap_or_default();
            self.fail(i, StepError::TimedOut { after });
        }
    }

    fn complete(&mut self, i: usize, result: Result<String, StepError>) {
        if self.abandoned.remove(&i) {
            log::debug!(
                "Ignoring late result of timed out step {}",
                self.records[i].step_id
            );
            return;
        }
        self.in_flight.remove(&i);

        match result {
            Ok(output) => self.succeed(i, output),
            Err(err) => self.fail(i, err),
        }
    }

    fn succeed(&mut self, i: usize, output: String) {
        let record = &mut self.records[i];
        record.status = StepStatus::Succeeded;
        record.finished_at = Some(self.clock.tick());
        record.output = output;
        log::debug!("Step {} succeeded", record.step_id);
        self.progress.on_step_complete(record);
        self.completion.push(i);

        let admitting = !self.cancelled
            && (self.first_failure.is_none() || self.opts.policy.continues_after_failure());
        if !admitting {
            return;
        }

        for &d in &self.dependents[i] {
            let runnable = self.records[d].status == StepStatus::Pending
                && self.preconditions[d]
                    .iter()
                    .all(|&p| self.records[p].status == StepStatus::Succeeded);
            if runnable {
                self.ready.push_back(d);
            }
        }
    }

    fn fail(&mut self, i: usize, err: StepError) {
        let record = &mut self.records[i];
        record.status = StepStatus::Failed;
        record.finished_at = Some(self.clock.tick());
        log::warn!("Step {} failed: {}", record.step_id, err);
        record.error = Some(err);
        self.progress.on_step_complete(record);
        self.first_failure.get_or_insert(i);
    }

    /// Every step still pending ends `skipped`, with the reason
    fn skip_remaining(&mut self) {
        for idx in 0..self.topo.len() {
            let i = self.topo[idx];
            if self.records[i].status != StepStatus::Pending {
                continue;
            }

            // An upstream that failed, or was itself skipped for a failure
            let upstream = self.preconditions[i]
                .iter()
                .find(|&&p| {
                    let record = &self.records[p];
                    record.status == StepStatus::Failed
                        || (record.status == StepStatus::Skipped
                            && record.skip_reason != Some(SkipReason::Cancelled))
                })
                .map(|&p| self.records[p].step_id.clone());

            let reason = match (upstream, self.first_failure) {
                (Some(upstream), _) => SkipReason::PreconditionUnsatisfied { upstream },
                (None, _) if self.cancelled => SkipReason::Cancelled,
                (None, Some(failed)) => SkipReason::Aborted {
                    failed: self.records[failed].step_id.clone(),
                },
                (None, None) => SkipReason::Cancelled,
            };

            let record = &mut self.records[i];
            record.status = StepStatus::Skipped;
            log::debug!("Skipping step {}: {}", record.step_id, reason);
            record.skip_reason = Some(reason);
            self.progress.on_step_complete(record);
        }
    }

    /// Compensate succeeded steps in reverse completion order
    fn rollback(&mut self, connection: &dyn Connection) {
        let ctx = ApplyContext {
            connection,
            timeout: self.opts.step_timeout,
            verbose: self.opts.verbose,
        };

        for &i in self.completion.iter().rev() {
            let step = &self.nodes[i].step;
            if self.records[i].status != StepStatus::Succeeded || !step.can_rollback() {
                continue;
            }

            self.progress.on_rollback(&self.records[i].step_id);
            log::debug!("Rolling back step {}", self.records[i].step_id);

            let result = panic::catch_unwind(AssertUnwindSafe(|| step.rollback(&ctx)))
                .unwrap_or_else(|payload| {
                    Err(StepError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });

            let record = &mut self.records[i];
            match result {
                Ok(output) => {
                    record.status = StepStatus::RolledBack;
                    record.rolled_back_at = Some(self.clock.tick());
                    if !output.is_empty() {
                        if !record.output.is_empty() {
                            record.output.push('\n');
                        }
                        record.output.push_str(&output);
                    }
                }
                Err(err) => {
                    log::warn!("Rollback of {} failed: {}", record.step_id, err);
                    record.rollback_error = Some(err);
                }
            }
            self.progress.on_step_complete(record);
        }
    }

    fn finish(mut self) -> RunReport {
        let finished_at = self.clock.tick();
        let completion = self
            .completion
            .iter()
            .map(|&i| self.records[i].step_id.clone())
            .collect();
        RunReport::new(
            self.opts.policy,
            self.cancelled,
            self.started_at,
            finished_at,
            self.records,
            completion,
        )
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
