//! Ledger service: the public operations behind the HTTP surface.

use std::sync::Arc;

use ledgerline_common::{AccountId, LedgerError, Result, TransactionId};
use ledgerline_ledger::{
    Account, AccountBalance, ExecutionLock, LedgerEngine, LedgerStore, Page, TransactionRecord,
    TransferReceipt, TransferRequest,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::{Metrics, SharedMetrics};
use crate::state::ServiceState;

/// Accounts, balances, transfers and reversals over one ledger store.
pub struct LedgerService {
    engine: Arc<LedgerEngine>,
    dispatcher: Dispatcher,
    state: RwLock<ServiceState>,
    metrics: SharedMetrics,
}

impl LedgerService {
    /// Build the engine and start the worker pool.
    pub fn start(store: Arc<dyn LedgerStore>, config: &DispatcherConfig) -> Self {
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let execution_lock = Arc::new(ExecutionLock::new(config.serialize_transfers));
        let engine = Arc::new(LedgerEngine::new(store, execution_lock));
        let dispatcher = Dispatcher::start(engine.clone(), config, metrics.clone());

        info!(
            serialize_transfers = config.serialize_transfers,
            "Ledger service running"
        );

        Self {
            engine,
            dispatcher,
            state: RwLock::new(ServiceState::Running),
            metrics,
        }
    }

    /// Open an account, funding it with `initial_balance`.
    #[instrument(skip(self))]
    pub async fn open_account(&self, owner_name: &str, initial_balance: Decimal) -> Result<Account> {
        let opened = self.engine.open_account(owner_name, initial_balance).await?;
        self.metrics.account_opened();
        Ok(opened.account)
    }

    /// Current committed balance of an active account.
    pub async fn get_balance(&self, account_id: AccountId) -> Result<AccountBalance> {
        self.engine
            .store()
            .get_account_by_id(&account_id)
            .await?
            .map(|account| AccountBalance::from(&account))
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Validate a transfer, queue it and wait for the outcome.
    #[instrument(skip(self, request), fields(from = %request.from_account_id, to = %request.to_account_id))]
    pub async fn submit_transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        request.validate()?;
        self.ensure_accepting()?;
        self.dispatcher.transfer(request).await
    }

    /// Records newest first, for one account or across all of them.
    pub async fn list_transactions(
        &self,
        account_id: Option<AccountId>,
        page: Page,
    ) -> Result<Vec<TransactionRecord>> {
        let store = self.engine.store();
        match account_id {
            Some(id) => store.get_transactions_by_account_id(&id, page).await,
            None => store.get_all_transactions(page).await,
        }
    }

    /// Queue a reversal and wait for the outcome.
    #[instrument(skip(self))]
    pub async fn reverse_transaction(&self, transaction_id: TransactionId) -> Result<TransactionRecord> {
        self.ensure_accepting()?;
        self.dispatcher.reverse(transaction_id).await
    }

    /// Stop accepting work and drain the queue. Safe to call more than once.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if state.is_shutting_down() {
                return;
            }
            *state = ServiceState::ShuttingDown;
        }

        info!("Ledger service shutting down");
        self.dispatcher.shutdown().await;
        *self.state.write() = ServiceState::Stopped;
        info!("Ledger service stopped");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Whether new transfers are accepted.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests() && self.dispatcher.is_accepting()
    }

    /// Shared counters.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    fn ensure_accepting(&self) -> Result<()> {
        if !self.is_accepting_requests() {
            self.metrics.job_rejected();
            warn!("Rejecting work during shutdown");
            return Err(LedgerError::ServiceUnavailable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_ledger::store::MemoryStore;
    use ledgerline_ledger::EntryType;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn service_with(serialize_transfers: bool) -> Arc<LedgerService> {
        Arc::new(LedgerService::start(
            Arc::new(MemoryStore::new()),
            &DispatcherConfig {
                serialize_transfers,
                ..DispatcherConfig::default()
            },
        ))
    }

    fn service() -> Arc<LedgerService> {
        service_with(true)
    }

    async fn balance(service: &LedgerService, id: AccountId) -> Decimal {
        service.get_balance(id).await.unwrap().balance
    }

    #[tokio::test]
    async fn test_alice_pays_bob() {
        let service = service();
        let alice = service.open_account("alice", dec!(100)).await.unwrap();
        let bob = service.open_account("bob", Decimal::ZERO).await.unwrap();

        service
            .submit_transfer(TransferRequest::new(alice.id, bob.id, dec!(30), "lunch"))
            .await
            .unwrap();

        assert_eq!(balance(&service, alice.id).await, dec!(70));
        assert_eq!(balance(&service, bob.id).await, dec!(30));

        let records = service
            .list_transactions(Some(alice.id), Page::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entry_type, EntryType::Debit);
        assert_eq!(records[0].description, "lunch");
        assert_eq!(records[1].entry_type, EntryType::Credit);
        assert_eq!(records[1].description, "Initial balance");

        let all = service.list_transactions(None, Page::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let err = service
            .submit_transfer(TransferRequest::new(alice.id, bob.id, dec!(1000), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(balance(&service, alice.id).await, dec!(70));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_validation_happens_before_enqueue() {
        let service = service();
        let alice = service.open_account("alice", dec!(10)).await.unwrap();
        let bob = service.open_account("bob", dec!(10)).await.unwrap();

        for request in [
            TransferRequest::new(alice.id, bob.id, Decimal::ZERO, ""),
            TransferRequest::new(alice.id, bob.id, dec!(-1), ""),
            TransferRequest::new(alice.id, bob.id, dec!(0.001), ""),
            TransferRequest::new(alice.id, alice.id, dec!(1), ""),
        ] {
            let err = service.submit_transfer(request).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidArgument { .. }));
        }
        assert_eq!(service.metrics().snapshot().jobs_submitted, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_deleted_accounts() {
        let store = MemoryStore::new();
        let service = LedgerService::start(Arc::new(store.clone()), &DispatcherConfig::default());
        let alice = service.open_account("alice", dec!(10)).await.unwrap();

        let ghost = AccountId::new();
        assert_eq!(
            service.get_balance(ghost).await.unwrap_err(),
            LedgerError::AccountNotFound(ghost)
        );

        store.soft_delete_account(&alice.id).await.unwrap();
        assert_eq!(
            service.get_balance(alice.id).await.unwrap_err(),
            LedgerError::AccountNotFound(alice.id)
        );
    }

    #[tokio::test]
    async fn test_open_account_rejects_negative_balance() {
        let service = service();
        let err = service.open_account("carol", dec!(-5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument { .. }));
        assert_eq!(service.metrics().snapshot().accounts_opened, 0);
    }

    #[tokio::test]
    async fn test_reverse_transaction() {
        let service = service();
        let alice = service.open_account("alice", dec!(100)).await.unwrap();
        let bob = service.open_account("bob", Decimal::ZERO).await.unwrap();
        let receipt = service
            .submit_transfer(TransferRequest::new(alice.id, bob.id, dec!(30), ""))
            .await
            .unwrap();

        let reversal = service.reverse_transaction(receipt.debit.id).await.unwrap();
        assert_eq!(reversal.entry_type, EntryType::Credit);
        assert_eq!(balance(&service, alice.id).await, dec!(100));

        assert_eq!(
            service.reverse_transaction(receipt.debit.id).await.unwrap_err(),
            LedgerError::AlreadyReversed(receipt.debit.id)
        );

        let missing = TransactionId::new();
        assert_eq!(
            service.reverse_transaction(missing).await.unwrap_err(),
            LedgerError::TransactionNotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_work() {
        let service = service();
        let alice = service.open_account("alice", dec!(10)).await.unwrap();
        let bob = service.open_account("bob", Decimal::ZERO).await.unwrap();

        service.shutdown().await;
        service.shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);

        let err = service
            .submit_transfer(TransferRequest::new(alice.id, bob.id, dec!(1), ""))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ServiceUnavailable);

        // Reads keep working.
        assert_eq!(balance(&service, alice.id).await, dec!(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_one_transfer_overdraws() {
        const N: usize = 10;
        let amount = dec!(10);

        let service = service();
        let source = service
            .open_account("source", amount * Decimal::from(N - 1))
            .await
            .unwrap();
        let sink = service.open_account("sink", Decimal::ZERO).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..N {
            let service = service.clone();
            let request = TransferRequest::new(source.id, sink.id, amount, "");
            handles.push(tokio::spawn(async move { service.submit_transfer(request).await }));
        }

        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => {}
                Err(LedgerError::InsufficientBalance { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(insufficient, 1);
        assert_eq!(balance(&service, source.id).await, Decimal::ZERO);
        assert_eq!(balance(&service, sink.id).await, amount * Decimal::from(N - 1));
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_complete_with_row_locks_only() {
        let service = service_with(false);
        let a = service.open_account("account-a", dec!(100)).await.unwrap();
        let b = service.open_account("account-b", dec!(100)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let service = service.clone();
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            handles.push(tokio::spawn(async move {
                service
                    .submit_transfer(TransferRequest::new(from, to, dec!(1), ""))
                    .await
            }));
        }

        let all = async {
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("transfers deadlocked");

        assert_eq!(balance(&service, a.id).await, dec!(100));
        assert_eq!(balance(&service, b.id).await, dec!(100));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let service = service();
        let alice = service.open_account("alice", dec!(42)).await.unwrap();

        let first = service.get_balance(alice.id).await.unwrap();
        let second = service.get_balance(alice.id).await.unwrap();
        assert_eq!(first, second);

        let page = Page::new(Some(5), Some(0));
        let first = service.list_transactions(None, page).await.unwrap();
        let second = service.list_transactions(None, page).await.unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_ledger_matches_balances(
            moves in proptest::collection::vec((0usize..3, 0usize..3, 1u32..60), 1..25)
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let service = service();
                let mut ids = Vec::new();
                for owner in ["acct-0", "acct-1", "acct-2"] {
                    ids.push(service.open_account(owner, dec!(100)).await.unwrap().id);
                }

                let mut handles = Vec::new();
                for (from, to, amount) in moves {
                    let service = service.clone();
                    let request =
                        TransferRequest::new(ids[from], ids[to], Decimal::from(amount), "");
                    handles.push(tokio::spawn(async move { service.submit_transfer(request).await }));
                }
                for handle in handles {
                    let _ = handle.await.unwrap();
                }

                let mut total = Decimal::ZERO;
                for id in &ids {
                    let balance = balance(&service, *id).await;
                    let ledger: Decimal = service
                        .list_transactions(Some(*id), Page::new(Some(i64::MAX), None))
                        .await
                        .unwrap()
                        .iter()
                        .map(TransactionRecord::signed_amount)
                        .sum();
                    assert!(balance >= Decimal::ZERO);
                    assert_eq!(balance, ledger);
                    total += balance;
                }
                assert_eq!(total, dec!(300));
                service.shutdown().await;
            });
        }
    }
}
