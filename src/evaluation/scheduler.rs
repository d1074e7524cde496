//! Runs exact + cumulative evaluations on a worker pool.
//!
//! Each dispatched request becomes an [`EvaluationTask`] holding the
//! receiving end of a one-shot channel. The owning thread polls or waits on
//! tasks and applies the outcomes itself; workers never touch the tree.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};

use super::error::{EvaluationError, EvaluationResult};
use super::reader::{EvalRequest, EvaluationReader, LoadMode, ReaderFactory, ReaderMode};
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalResult {
    /// The exact pass succeeded.
    Ok,
    /// Only the cumulative pass succeeded; exact values are unreliable.
    Partial,
    /// Nothing usable.
    Fail,
}

/// Both readers plus the verdict, handed back to the owning thread.
pub struct EvaluationOutcome {
    pub request: EvalRequest,
    pub result: EvalResult,
    pub exact: Box<dyn EvaluationReader>,
    pub cumulative: Box<dyn EvaluationReader>,
}

impl std::fmt::Debug for EvaluationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationOutcome")
            .field("request", &self.request)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Evaluate one unit synchronously.
pub fn evaluate(factory: &dyn ReaderFactory, request: &EvalRequest) -> EvaluationOutcome {
    let mut exact = factory.create(ReaderMode::Exact, request);
    let mut cumulative = factory.create(ReaderMode::Cumulative, request);

    let result = match exact.parse(&request.pro_file) {
        None => EvalResult::Fail,
        Some(file) => {
            let exact_ok = exact.accept(&file, LoadMode::All);
            let cumulative_ok = match cumulative.parse(&request.pro_file) {
                Some(file) => cumulative.accept(&file, LoadMode::PreFiles),
                None => false,
            };
            match (exact_ok, cumulative_ok) {
                (_, false) => EvalResult::Fail,
                (false, true) => EvalResult::Partial,
                (true, true) => EvalResult::Ok,
            }
        }
    };

    for diagnostic in exact.diagnostics() {
        tracing::warn!(target: "evaluation", "{diagnostic}");
    }
    crate::debug_event!(
        "evaluation",
        "evaluated",
        "{} -> {result:?}",
        request.pro_file.display()
    );

    EvaluationOutcome {
        request: request.clone(),
        result,
        exact,
        cumulative,
    }
}

/// Handle to an in-flight evaluation.
///
/// The scheduler's pending count covers the task until the handle is
/// dropped, so an owner that applies the outcome before dropping the
/// handle is still counted while it applies.
#[derive(Debug)]
pub struct EvaluationTask {
    unit: NodeId,
    rx: Receiver<EvaluationOutcome>,
    cancelled: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    consumed: bool,
}

impl EvaluationTask {
    pub fn unit(&self) -> NodeId {
        self.unit
    }

    /// Ask the worker to skip the evaluation if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Ok(None)` while the worker is still busy.
    pub fn try_take(&mut self) -> EvaluationResult<Option<EvaluationOutcome>> {
        match self.rx.try_recv() {
            Ok(outcome) => Ok(Some(self.consume(outcome))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.dropped()),
        }
    }

    pub fn wait(&mut self, timeout: Duration) -> EvaluationResult<Option<EvaluationOutcome>> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(Some(self.consume(outcome))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.dropped()),
        }
    }

    /// Block until the worker is done with this task, whatever the result.
    pub fn finish(mut self) -> Option<EvaluationOutcome> {
        self.rx.recv().ok().map(|outcome| self.consume(outcome))
    }

    fn consume(&mut self, outcome: EvaluationOutcome) -> EvaluationOutcome {
        self.consumed = true;
        outcome
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    fn dropped(&self) -> EvaluationError {
        EvaluationError::Pool(format!("evaluation of unit {} was dropped", self.unit))
    }
}

impl Drop for EvaluationTask {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct EvaluationScheduler {
    pool: rayon::ThreadPool,
    factory: Arc<dyn ReaderFactory>,
    pending: Arc<AtomicUsize>,
}

impl EvaluationScheduler {
    pub fn new(worker_threads: usize, factory: Arc<dyn ReaderFactory>) -> EvaluationResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("qmake-eval-{i}"))
            .build()
            .map_err(|e| EvaluationError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            factory,
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn factory(&self) -> &dyn ReaderFactory {
        self.factory.as_ref()
    }

    /// Evaluations dispatched whose handle is still alive.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn dispatch(&self, request: EvalRequest) -> EvaluationTask {
        let (tx, rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let unit = request.unit;

        let factory = Arc::clone(&self.factory);
        let flag = Arc::clone(&cancelled);
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.pool.spawn(move || {
            if flag.load(Ordering::Acquire) {
                return;
            }
            let outcome = evaluate(factory.as_ref(), &request);
            // The receiver is gone when the unit was removed meanwhile.
            let _ = tx.send(outcome);
        });

        EvaluationTask {
            unit,
            rx,
            cancelled,
            pending: Arc::clone(&self.pending),
            consumed: false,
        }
    }
}

impl std::fmt::Debug for EvaluationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationScheduler")
            .field("threads", &self.pool.current_num_threads())
            .field("pending", &self.pending())
            .finish()
    }
}
