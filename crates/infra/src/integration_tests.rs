//! Integration tests for the full pipeline.
//!
//! Tests: Ledger → Outbox → Relay → EventBus → Consumer → Projection / Statement
//!
//! Verifies:
//! - Committed mutations reach the projection exactly once
//! - Idempotency keys block replays, concurrent ones included
//! - Transient handler failures are retried; poison messages are dead-lettered
//! - Statement jobs always end in one terminal state

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::{DateTime, Utc};

    use ledgerflow_core::{
        AccountName, AccountNumber, Document, EventId, IdempotencyKey, StatementGenerationId,
    };
    use ledgerflow_events::{
        EventBus, EventEnvelope, FundsDeposited, InMemoryEventBus, LedgerEvent, Subscription,
        Topic,
    };
    use ledgerflow_statements::{Direction, MirroredAccount, Movement, StatementGeneration};

    use crate::consumer::{DeadLetterQueue, EventDispatcher, ProjectionConsumer, RetryPolicy};
    use crate::ledger::{LedgerError, LedgerService, OutboxRelay};
    use crate::statement::{
        DocumentRenderer, RenderError, StatementContent, StatementError, StatementService,
        TIMEOUT_MESSAGE,
    };
    use crate::store::{
        ApplyOutcome, InMemoryLedgerStore, InMemoryProjectionStore, LedgerStore,
        ProjectionChange, ProjectionStore, StoreError,
    };
    use crate::workers::{ConsumerWorker, SweeperWorker, WorkerHandle};

    type Bus = Arc<InMemoryEventBus<EventEnvelope>>;
    type Projection = Arc<dyn ProjectionStore>;

    const PDF: &[u8] = b"%PDF-1.4 statement";

    struct FakePdf;

    impl DocumentRenderer for FakePdf {
        fn render_html(&self, _html: &str) -> Result<Vec<u8>, RenderError> {
            Ok(PDF.to_vec())
        }
    }

    struct Pipeline {
        ledger: LedgerService<Arc<InMemoryLedgerStore>>,
        relay: OutboxRelay<Arc<InMemoryLedgerStore>, Bus>,
        projection: Projection,
        statements: Arc<StatementService<Projection, Bus>>,
        dead_letters: Arc<DeadLetterQueue>,
        bus: Bus,
        workers: Vec<WorkerHandle>,
    }

    impl Pipeline {
        fn start(projection: Projection) -> Self {
            let ledger_store = Arc::new(InMemoryLedgerStore::new());
            let bus: Bus = Arc::new(InMemoryEventBus::new());
            let dead_letters = Arc::new(DeadLetterQueue::new());
            let statements = Arc::new(StatementService::new(
                projection.clone(),
                bus.clone(),
                FakePdf,
                Duration::from_secs(300),
            ));
            let retry = RetryPolicy::fixed(3, Duration::from_millis(5));

            let projection_worker = ConsumerWorker::spawn(
                "projection-consumer",
                &bus,
                Some(Topic::Account),
                EventDispatcher::new().with_handler(ProjectionConsumer::new(projection.clone())),
                retry.clone(),
                dead_letters.clone(),
            )
            .unwrap();
            let statement_worker = ConsumerWorker::spawn(
                "statement-consumer",
                &bus,
                Some(Topic::Statement),
                EventDispatcher::new().with_handler(statements.clone()),
                retry,
                dead_letters.clone(),
            )
            .unwrap();

            Self {
                ledger: LedgerService::new(ledger_store.clone()),
                relay: OutboxRelay::new(ledger_store, bus.clone()),
                projection,
                statements,
                dead_letters,
                bus,
                workers: vec![projection_worker, statement_worker],
            }
        }

        fn in_memory() -> Self {
            Self::start(Arc::new(InMemoryProjectionStore::new()))
        }

        fn open(&self, document: &str, name: &str) -> AccountNumber {
            self.ledger.create_account(document, name).unwrap().number
        }

        fn relay(&self) {
            self.relay.drain().unwrap();
        }

        fn mirrored_balance(&self, number: AccountNumber) -> Option<i64> {
            self.projection
                .account(number)
                .unwrap()
                .map(|a| a.balance())
        }

        fn movements(&self, number: AccountNumber) -> Vec<Movement> {
            self.projection.movements(number).unwrap()
        }
    }

    impl Drop for Pipeline {
        fn drop(&mut self) {
            for worker in self.workers.drain(..) {
                worker.shutdown();
            }
        }
    }

    fn key(raw: &str) -> IdempotencyKey {
        IdempotencyKey::parse(raw).unwrap()
    }

    fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn deposit_reaches_projection_and_key_blocks_replay() {
        let pipeline = Pipeline::in_memory();
        let number = pipeline.open("01234567890", "John Doe");

        pipeline.ledger.deposit(number, 150, &key("dep-1")).unwrap();
        pipeline.relay();

        eventually("mirrored deposit", || pipeline.mirrored_balance(number) == Some(150));
        let movements = pipeline.movements(number);
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].direction, Direction::In);
        assert_eq!(movements[0].value, 150);
        assert_eq!(movements[0].counterparty, None);

        assert_eq!(
            pipeline.ledger.deposit(number, 150, &key("dep-1")),
            Err(LedgerError::AlreadyProcessed)
        );
        pipeline.relay();

        let account = pipeline.ledger.get_account(number).unwrap().unwrap();
        assert_eq!(account.balance(), 150);
        assert!(
            pipeline
                .ledger
                .store()
                .idempotency_key(&key("dep-1"))
                .unwrap()
                .unwrap()
                .is_confirmed()
        );
        assert_eq!(pipeline.movements(number).len(), 1);
    }

    #[test]
    fn transfer_updates_both_mirrored_balances() {
        let pipeline = Pipeline::in_memory();
        let a = pipeline.open("01234567890", "Alice Doe");
        let b = pipeline.open("01234567891", "Bobby Doe");
        pipeline.ledger.deposit(a, 100, &key("seed")).unwrap();

        pipeline.ledger.transfer(a, b, 25, &key("tx-1")).unwrap();
        pipeline.relay();

        assert_eq!(pipeline.ledger.get_account(a).unwrap().unwrap().balance(), 75);
        assert_eq!(pipeline.ledger.get_account(b).unwrap().unwrap().balance(), 25);

        eventually("mirrored transfer", || {
            pipeline.mirrored_balance(a) == Some(75) && pipeline.mirrored_balance(b) == Some(25)
        });

        let out = pipeline.movements(a);
        assert_eq!(out.last().unwrap().direction, Direction::Out);
        assert_eq!(out.last().unwrap().counterparty, Some(b));

        let incoming = pipeline.movements(b);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].direction, Direction::In);
        assert_eq!(incoming[0].counterparty, Some(a));
    }

    #[test]
    fn concurrent_replays_apply_once() {
        let pipeline = Pipeline::in_memory();
        let number = pipeline.open("01234567890", "John Doe");

        let ledger = &pipeline.ledger;
        let results: Vec<Result<(), LedgerError>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(move |_| s.spawn(move || ledger.deposit(number, 10, &key("same-key"))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == LedgerError::AlreadyProcessed)
        );
        assert_eq!(pipeline.ledger.get_account(number).unwrap().unwrap().balance(), 10);
    }

    #[test]
    fn redelivered_envelope_is_projected_once() {
        let pipeline = Pipeline::in_memory();
        let number = pipeline.open("01234567890", "John Doe");
        pipeline.relay();
        eventually("mirrored account", || pipeline.mirrored_balance(number).is_some());

        let envelope = EventEnvelope::seal(&LedgerEvent::FundsDeposited(FundsDeposited {
            number,
            value: 40,
        }))
        .unwrap();
        pipeline.bus.publish(envelope.clone()).unwrap();
        pipeline.bus.publish(envelope).unwrap();

        eventually("mirrored deposit", || pipeline.mirrored_balance(number) == Some(40));
        // Give the duplicate time to arrive.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pipeline.mirrored_balance(number), Some(40));
        assert_eq!(pipeline.movements(number).len(), 1);
    }

    #[test]
    fn poison_message_is_dead_lettered_and_unknown_types_ignored() {
        let pipeline = Pipeline::in_memory();

        let unknown = EventEnvelope::from_parts(
            EventId::new(),
            "AccountClosed",
            1,
            Utc::now(),
            "{}",
        );
        let broken = EventEnvelope::from_parts(
            EventId::new(),
            "FundsDeposited",
            1,
            Utc::now(),
            "{\"number\":",
        );
        // Unknown types reach only unfiltered subscribers; route this one explicitly.
        let sub: Subscription<EventEnvelope> = pipeline.bus.subscribe();
        pipeline.bus.publish(unknown).unwrap();
        pipeline.bus.publish(broken.clone()).unwrap();
        assert_eq!(sub.try_recv().unwrap().event_type(), "AccountClosed");

        eventually("dead letter", || pipeline.dead_letters.len().unwrap() == 1);
        let letter = pipeline.dead_letters.take(broken.id()).unwrap().unwrap();
        assert_eq!(letter.attempts, 1);
        assert!(letter.reason.contains("undecodable"));
    }

    /// Projection store whose `apply` fails with a backend error a set number of times.
    struct FlakyProjectionStore {
        inner: InMemoryProjectionStore,
        failures_left: AtomicU32,
        apply_calls: AtomicU32,
    }

    impl FlakyProjectionStore {
        fn new() -> Self {
            Self {
                inner: InMemoryProjectionStore::new(),
                failures_left: AtomicU32::new(0),
                apply_calls: AtomicU32::new(0),
            }
        }
    }

    impl ProjectionStore for FlakyProjectionStore {
        fn account(&self, number: AccountNumber) -> Result<Option<MirroredAccount>, StoreError> {
            self.inner.account(number)
        }

        fn movements(&self, number: AccountNumber) -> Result<Vec<Movement>, StoreError> {
            self.inner.movements(number)
        }

        fn apply(
            &self,
            event_id: EventId,
            change: ProjectionChange,
        ) -> Result<ApplyOutcome, StoreError> {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::backend("connection reset"));
            }
            self.inner.apply(event_id, change)
        }

        fn has_running_generation(&self, number: AccountNumber) -> Result<bool, StoreError> {
            self.inner.has_running_generation(number)
        }

        fn insert_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
            self.inner.insert_generation(generation)
        }

        fn generation(
            &self,
            id: StatementGenerationId,
        ) -> Result<Option<StatementGeneration>, StoreError> {
            self.inner.generation(id)
        }

        fn finish_generation(&self, generation: &StatementGeneration) -> Result<(), StoreError> {
            self.inner.finish_generation(generation)
        }

        fn running_generations_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<StatementGeneration>, StoreError> {
            self.inner.running_generations_before(cutoff)
        }
    }

    #[test]
    fn transient_failures_are_retried_until_applied() {
        let store = Arc::new(FlakyProjectionStore::new());
        let pipeline = Pipeline::start(store.clone());
        let number = pipeline.open("01234567890", "John Doe");
        pipeline.relay();
        eventually("mirrored account", || pipeline.mirrored_balance(number).is_some());

        store.failures_left.store(2, Ordering::SeqCst);
        let calls_before = store.apply_calls.load(Ordering::SeqCst);
        pipeline.ledger.deposit(number, 150, &key("dep-1")).unwrap();
        pipeline.relay();

        eventually("retried deposit", || pipeline.mirrored_balance(number) == Some(150));
        assert_eq!(store.apply_calls.load(Ordering::SeqCst) - calls_before, 3);
        assert!(pipeline.dead_letters.is_empty().unwrap());
    }

    #[test]
    fn exhausted_retries_are_dead_lettered() {
        let store = Arc::new(FlakyProjectionStore::new());
        let pipeline = Pipeline::start(store.clone());
        let number = pipeline.open("01234567890", "John Doe");
        pipeline.relay();
        eventually("mirrored account", || pipeline.mirrored_balance(number).is_some());

        store.failures_left.store(10, Ordering::SeqCst);
        pipeline.ledger.deposit(number, 150, &key("dep-1")).unwrap();
        pipeline.relay();

        eventually("dead letter", || pipeline.dead_letters.len().unwrap() == 1);
        let letters = pipeline.dead_letters.list().unwrap();
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].envelope.event_type(), "FundsDeposited");
        assert_eq!(pipeline.mirrored_balance(number), Some(0));

        // Requeue once the store recovers.
        store.failures_left.store(0, Ordering::SeqCst);
        let letter = pipeline
            .dead_letters
            .take(letters[0].envelope.id())
            .unwrap()
            .unwrap();
        pipeline.bus.publish(letter.envelope).unwrap();
        eventually("requeued deposit", || pipeline.mirrored_balance(number) == Some(150));
    }

    #[test]
    fn statement_is_generated_asynchronously() {
        let pipeline = Pipeline::in_memory();
        let number = pipeline.open("01234567890", "John Doe");
        pipeline.ledger.deposit(number, 150, &key("dep-1")).unwrap();
        pipeline.relay();
        eventually("mirrored deposit", || pipeline.mirrored_balance(number) == Some(150));

        let id = pipeline.statements.trigger(number).unwrap();
        eventually("finished statement", || {
            matches!(pipeline.statements.get(id), Ok(StatementContent::Ready(_)))
        });

        match pipeline.statements.get(id).unwrap() {
            StatementContent::Ready(content) => {
                assert_eq!(STANDARD.decode(content).unwrap(), PDF);
            }
            other => panic!("unexpected content: {other:?}"),
        }

        // The finished job no longer blocks admission.
        assert!(pipeline.statements.trigger(number).is_ok());
    }

    #[test]
    fn statement_for_unknown_account_creates_no_job() {
        let pipeline = Pipeline::in_memory();
        let unknown = AccountNumber::new(404).unwrap();

        assert_eq!(
            pipeline.statements.trigger(unknown),
            Err(StatementError::AccountNotFound)
        );
        assert!(!pipeline.projection.has_running_generation(unknown).unwrap());
    }

    struct DeadBus;

    impl EventBus<EventEnvelope> for DeadBus {
        type Error = String;

        fn publish(&self, _message: EventEnvelope) -> Result<(), Self::Error> {
            Err("broker unreachable".to_string())
        }

        fn subscribe(&self) -> Subscription<EventEnvelope> {
            Subscription::new(std::sync::mpsc::channel().1)
        }

        fn subscribe_to(&self, _topic: Topic) -> Subscription<EventEnvelope> {
            self.subscribe()
        }
    }

    fn projection_with_account(number: AccountNumber) -> Arc<InMemoryProjectionStore> {
        let store = Arc::new(InMemoryProjectionStore::new());
        store
            .apply(
                EventId::new(),
                ProjectionChange::CreateAccount(MirroredAccount::created(
                    number,
                    Document::parse("01234567890").unwrap(),
                    AccountName::parse("John Doe").unwrap(),
                )),
            )
            .unwrap();
        store
    }

    #[test]
    fn unpublished_statement_request_does_not_block_the_account() {
        let number = AccountNumber::FIRST;
        let service = StatementService::new(
            projection_with_account(number),
            DeadBus,
            FakePdf,
            Duration::from_secs(300),
        );

        assert!(matches!(service.trigger(number), Err(StatementError::Publish(_))));
        assert!(!service.store().has_running_generation(number).unwrap());
        assert!(matches!(service.trigger(number), Err(StatementError::Publish(_))));
    }

    #[test]
    fn sweeper_fails_jobs_that_never_render() {
        let number = AccountNumber::FIRST;
        // No consumer: the request is never rendered.
        let service = Arc::new(StatementService::new(
            projection_with_account(number),
            Arc::new(InMemoryEventBus::<EventEnvelope>::new()),
            FakePdf,
            Duration::ZERO,
        ));
        let id = service.trigger(number).unwrap();

        let sweeper =
            SweeperWorker::spawn("statement-sweeper", service.clone(), Duration::from_millis(10))
                .unwrap();
        eventually("timed out job", || {
            service.get(id) == Err(StatementError::GenerationFailed(TIMEOUT_MESSAGE.to_string()))
        });
        sweeper.shutdown();

        assert!(!service.store().has_running_generation(number).unwrap());
    }
}
