//! Worker pool that funnels balance-changing work through the ledger engine.
//!
//! Submitters enqueue a [`LedgerCommand`] on a bounded queue and wait on a
//! one-shot reply. A fixed set of workers drain the queue. Shutdown refuses
//! new submissions, lets the workers finish everything already queued and
//! then waits for them to exit.

use std::sync::Arc;
use std::time::Duration;

use ledgerline_common::{LedgerError, Result, TransactionId};
use ledgerline_ledger::{LedgerEngine, TransactionRecord, TransferReceipt, TransferRequest};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::metrics::SharedMetrics;

/// Work accepted by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// Move money between two accounts.
    Transfer(TransferRequest),
    /// Write the opposite of an existing record.
    Reverse(TransactionId),
}

impl LedgerCommand {
    fn name(&self) -> &'static str {
        match self {
            LedgerCommand::Transfer(_) => "transfer",
            LedgerCommand::Reverse(_) => "reverse",
        }
    }
}

/// Result of a committed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Transferred(TransferReceipt),
    Reversed(TransactionRecord),
}

struct Job {
    command: LedgerCommand,
    /// Fired by the worker just before the command runs.
    started: oneshot::Sender<()>,
    reply: oneshot::Sender<Result<CommandOutcome>>,
}

/// Bounded worker pool in front of the ledger engine.
pub struct Dispatcher {
    /// Queue handle; `None` once shutdown has begun.
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,
    /// Worker task handles, taken by `shutdown`.
    workers: Mutex<Vec<JoinHandle<()>>>,
    job_timeout: Option<Duration>,
    metrics: SharedMetrics,
}

impl Dispatcher {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(
        engine: Arc<LedgerEngine>,
        config: &DispatcherConfig,
        metrics: SharedMetrics,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    engine.clone(),
                    receiver.clone(),
                    metrics.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Dispatcher started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            shutdown_tx,
            workers: Mutex::new(workers),
            job_timeout: config.job_timeout,
            metrics,
        }
    }

    /// Whether new submissions are accepted.
    pub fn is_accepting(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    /// Queue a command and wait for its result.
    ///
    /// Waits for queue space when the queue is full. Fails with
    /// `ServiceUnavailable` once shutdown has begun. The job timeout bounds
    /// only the wait for a worker to pick the job up: a job that has not
    /// started by then fails with `Timeout` and never runs, and a job that
    /// has started is always waited for.
    pub async fn submit(&self, command: LedgerCommand) -> Result<CommandOutcome> {
        let operation = command.name();
        let (reply, completion) = oneshot::channel();
        let (started_tx, mut started) = oneshot::channel();
        let job = Job {
            command,
            started: started_tx,
            reply,
        };

        let picked_up = match self.job_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.wait_for_start(job, &mut started)).await
            }
            None => Ok(self.wait_for_start(job, &mut started).await),
        };

        match picked_up {
            Ok(queued) => queued?,
            Err(_) => {
                // Closing first means a worker either already started the job
                // or will find it abandoned.
                started.close();
                if started.try_recv().is_err() {
                    self.metrics.job_timed_out();
                    let limit = self.job_timeout.unwrap_or_default();
                    warn!(operation, timeout_ms = limit.as_millis() as u64, "Job timed out");
                    return Err(LedgerError::Timeout(operation.to_string()));
                }
            }
        }

        // The sender only disappears without a reply if the job's task died.
        completion.await.unwrap_or(Err(LedgerError::ServiceUnavailable))
    }

    /// Submit a transfer.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        match self.submit(LedgerCommand::Transfer(request)).await? {
            CommandOutcome::Transferred(receipt) => Ok(receipt),
            other => Err(unexpected(other)),
        }
    }

    /// Submit a reversal.
    pub async fn reverse(&self, transaction_id: TransactionId) -> Result<TransactionRecord> {
        match self.submit(LedgerCommand::Reverse(transaction_id)).await? {
            CommandOutcome::Reversed(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    /// Stop accepting work, drain the queue and wait for the workers.
    ///
    /// Only the first call drains; later calls return immediately.
    pub async fn shutdown(&self) {
        let sender = self.sender.write().take();
        let Some(sender) = sender else {
            return;
        };

        info!("Dispatcher shutting down");
        self.shutdown_tx.send_replace(true);
        drop(sender);

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker exited abnormally");
            }
        }

        info!("Dispatcher drained");
    }

    async fn wait_for_start(&self, job: Job, started: &mut oneshot::Receiver<()>) -> Result<()> {
        let sender = self.sender.read().clone();
        let Some(sender) = sender else {
            self.metrics.job_rejected();
            return Err(LedgerError::ServiceUnavailable);
        };

        tokio::select! {
            biased;
            _ = shutdown_signalled(self.shutdown_tx.subscribe()) => {
                self.metrics.job_rejected();
                return Err(LedgerError::ServiceUnavailable);
            }
            permit = sender.reserve() => {
                let Ok(permit) = permit else {
                    self.metrics.job_rejected();
                    return Err(LedgerError::ServiceUnavailable);
                };
                self.metrics.job_enqueued();
                permit.send(job);
            }
        }
        drop(sender);

        // An error here means the job was dropped unstarted; the reply says why.
        let _ = started.await;
        Ok(())
    }
}

fn unexpected(outcome: CommandOutcome) -> LedgerError {
    LedgerError::storage(format!("unexpected command outcome: {outcome:?}"))
}

async fn shutdown_signalled(mut signal: watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

async fn run_worker(
    worker_id: usize,
    engine: Arc<LedgerEngine>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    metrics: SharedMetrics,
) {
    debug!(worker_id, "Worker started");

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        metrics.job_dequeued();

        if job.started.send(()).is_err() {
            metrics.job_abandoned();
            warn!(worker_id, operation = job.command.name(), "Skipping abandoned job");
            continue;
        }

        // Run on its own task so a panic costs only this job.
        let task = tokio::spawn(execute(engine.clone(), job.command, metrics.clone()));
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(worker_id, error = %e, "Job panicked");
                Err(LedgerError::ServiceUnavailable)
            }
        };

        match &result {
            Ok(_) => metrics.job_completed(),
            Err(_) => metrics.job_failed(),
        }

        let _ = job.reply.send(result);
    }

    debug!(worker_id, "Worker stopped");
}

async fn execute(
    engine: Arc<LedgerEngine>,
    command: LedgerCommand,
    metrics: SharedMetrics,
) -> Result<CommandOutcome> {
    match command {
        LedgerCommand::Transfer(request) => {
            let receipt = engine.transfer(&request).await?;
            metrics.transfer_committed();
            Ok(CommandOutcome::Transferred(receipt))
        }
        LedgerCommand::Reverse(transaction_id) => {
            let record = engine.reverse(transaction_id).await?;
            metrics.reversal_committed();
            Ok(CommandOutcome::Reversed(record))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use ledgerline_common::AccountId;
    use ledgerline_ledger::store::MemoryStore;
    use ledgerline_ledger::{ExecutionLock, LedgerStore};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: Arc<LedgerEngine>,
        metrics: SharedMetrics,
        alice: AccountId,
        bob: AccountId,
    }

    async fn fixture(lock: ExecutionLock) -> Fixture {
        let engine = Arc::new(LedgerEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(lock),
        ));
        let alice = engine.open_account("alice", dec!(100)).await.unwrap().account.id;
        let bob = engine.open_account("bob", Decimal::ZERO).await.unwrap().account.id;
        Fixture {
            engine,
            metrics: Arc::new(Metrics::new()),
            alice,
            bob,
        }
    }

    fn config(workers: usize, queue_capacity: usize) -> DispatcherConfig {
        DispatcherConfig {
            workers,
            queue_capacity,
            ..DispatcherConfig::default()
        }
    }

    async fn balance(engine: &LedgerEngine, id: AccountId) -> Decimal {
        engine
            .store()
            .get_account_by_id(&id)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn test_submit_transfer_and_reverse() {
        let f = fixture(ExecutionLock::exclusive()).await;
        let dispatcher = Dispatcher::start(f.engine.clone(), &config(2, 4), f.metrics.clone());

        let receipt = dispatcher
            .transfer(TransferRequest::new(f.alice, f.bob, dec!(30), "lunch"))
            .await
            .unwrap();
        assert_eq!(balance(&f.engine, f.bob).await, dec!(30));

        let reversal = dispatcher.reverse(receipt.credit.id).await.unwrap();
        assert_eq!(reversal.reversal_of, Some(receipt.credit.id));
        assert_eq!(balance(&f.engine, f.bob).await, Decimal::ZERO);

        let err = dispatcher
            .transfer(TransferRequest::new(f.alice, f.bob, dec!(1000), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let snapshot = f.metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted, 3);
        assert_eq!(snapshot.jobs_completed, 2);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.transfers_committed, 1);
        assert_eq!(snapshot.reversals_committed, 1);
        assert_eq!(snapshot.queue_depth, 0);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let f = fixture(ExecutionLock::exclusive()).await;
        let dispatcher = Dispatcher::start(f.engine.clone(), &config(1, 1), f.metrics.clone());

        dispatcher.shutdown().await;
        assert!(!dispatcher.is_accepting());

        let err = dispatcher
            .transfer(TransferRequest::new(f.alice, f.bob, dec!(1), ""))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ServiceUnavailable);
        assert_eq!(f.metrics.snapshot().jobs_rejected, 1);
        assert_eq!(balance(&f.engine, f.alice).await, dec!(100));

        // Second shutdown is a no-op.
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_drains_queued_jobs() {
        let f = fixture(ExecutionLock::exclusive()).await;
        let dispatcher = Arc::new(Dispatcher::start(
            f.engine.clone(),
            &config(2, 64),
            f.metrics.clone(),
        ));

        let mut submitters = Vec::new();
        for _ in 0..20 {
            let dispatcher = dispatcher.clone();
            let request = TransferRequest::new(f.alice, f.bob, dec!(1), "");
            submitters.push(tokio::spawn(async move { dispatcher.transfer(request).await }));
        }

        // Wait until every submission is queued or finished.
        while f.metrics.snapshot().jobs_submitted < 20 {
            tokio::task::yield_now().await;
        }
        dispatcher.shutdown().await;

        for submitter in submitters {
            submitter.await.unwrap().unwrap();
        }
        assert_eq!(balance(&f.engine, f.bob).await, dec!(20));
        assert_eq!(f.metrics.snapshot().jobs_completed, 20);
    }

    #[tokio::test]
    async fn test_timed_out_job_is_skipped() {
        let lock = Arc::new(ExecutionLock::exclusive());
        let f = fixture(ExecutionLock::disabled()).await;
        let engine = Arc::new(LedgerEngine::new(f.engine.store().clone(), lock.clone()));
        let dispatcher = Arc::new(Dispatcher::start(
            engine.clone(),
            &DispatcherConfig {
                workers: 1,
                queue_capacity: 4,
                job_timeout: Some(Duration::from_millis(50)),
                serialize_transfers: true,
            },
            f.metrics.clone(),
        ));

        // Hold the execution lock so the single worker stalls on the first job.
        let guard = lock.acquire().await;

        let running = {
            let dispatcher = dispatcher.clone();
            let request = TransferRequest::new(f.alice, f.bob, dec!(1), "");
            tokio::spawn(async move { dispatcher.transfer(request).await })
        };
        while f.metrics.snapshot().jobs_submitted < 1 || f.metrics.snapshot().queue_depth > 0 {
            tokio::task::yield_now().await;
        }

        let queued = dispatcher
            .transfer(TransferRequest::new(f.alice, f.bob, dec!(2), ""))
            .await;
        assert!(matches!(queued, Err(LedgerError::Timeout(_))));

        drop(guard);
        dispatcher.shutdown().await;

        // Only the queued job timed out; it was skipped and never ran.
        let snapshot = f.metrics.snapshot();
        assert_eq!(snapshot.jobs_timed_out, 1);
        assert_eq!(snapshot.jobs_abandoned, 1);
        assert_eq!(balance(&engine, f.bob).await, dec!(1));
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_started_job_outlives_job_timeout() {
        let lock = Arc::new(ExecutionLock::exclusive());
        let f = fixture(ExecutionLock::disabled()).await;
        let engine = Arc::new(LedgerEngine::new(f.engine.store().clone(), lock.clone()));
        let dispatcher = Arc::new(Dispatcher::start(
            engine.clone(),
            &DispatcherConfig {
                workers: 1,
                queue_capacity: 4,
                job_timeout: Some(Duration::from_millis(50)),
                serialize_transfers: true,
            },
            f.metrics.clone(),
        ));

        let guard = lock.acquire().await;
        let submitter = {
            let dispatcher = dispatcher.clone();
            let request = TransferRequest::new(f.alice, f.bob, dec!(30), "");
            tokio::spawn(async move { dispatcher.transfer(request).await })
        };

        // The worker picks the job up and then stalls well past the deadline.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!submitter.is_finished());
        drop(guard);

        let receipt = submitter.await.unwrap().unwrap();
        assert_eq!(receipt.credit.amount, dec!(30));
        assert_eq!(balance(&engine, f.bob).await, dec!(30));
        assert_eq!(f.metrics.snapshot().jobs_timed_out, 0);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_backpressure_waits_for_queue_space() {
        let f = fixture(ExecutionLock::exclusive()).await;
        let dispatcher = Arc::new(Dispatcher::start(
            f.engine.clone(),
            &DispatcherConfig {
                workers: 1,
                queue_capacity: 1,
                job_timeout: None,
                serialize_transfers: true,
            },
            f.metrics.clone(),
        ));

        let results = join_all(
            (0..5)
                .map(|_| {
                    let dispatcher = dispatcher.clone();
                    let request = TransferRequest::new(f.alice, f.bob, dec!(10), "");
                    tokio::spawn(async move { dispatcher.transfer(request).await })
                })
                .collect(),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(balance(&f.engine, f.bob).await, dec!(50));
        dispatcher.shutdown().await;
    }

    async fn join_all(
        handles: Vec<JoinHandle<Result<TransferReceipt>>>,
    ) -> Vec<Result<TransferReceipt>> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }
}
