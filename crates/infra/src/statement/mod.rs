//! Statement generation: admission, the render reaction, polling and the
//! deadline sweep.
//!
//! `trigger` admits at most one running job per account and publishes
//! `StatementGenerationRequested`. Consuming that event runs [`StatementService::generate`],
//! which always ends the job in exactly one terminal state.

mod renderer;
mod template;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use ledgerflow_core::{AccountNumber, StatementGenerationId};
use ledgerflow_events::{
    EventBus, EventEnvelope, EventTag, LedgerEvent, StatementGenerationRequested,
};
use ledgerflow_statements::{GenerationStatus, StatementGeneration, StatementReport};

use crate::consumer::{EventHandler, Handled, HandlerError};
use crate::store::{ProjectionStore, StoreError};

pub use renderer::{DocumentRenderer, GotenbergRenderer, RenderError};
pub use template::{HtmlStatementTemplate, StatementTemplate, TemplateError};

/// Error text stored on jobs failed by the deadline sweep.
pub const TIMEOUT_MESSAGE: &str = "statement generation timed out";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("account not found")]
    AccountNotFound,

    #[error("a statement generation is already running for this account")]
    AlreadyRunning,

    #[error("statement generation not found")]
    NotFound,

    /// The job ended in `errorGenerating`; carries the stored error.
    #[error("statement generation failed: {0}")]
    GenerationFailed(String),

    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("publish failed: {0}")]
    Publish(String),
}

impl From<StoreError> for StatementError {
    fn from(err: StoreError) -> Self {
        StatementError::Store(err)
    }
}

/// What polling a job returns when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementContent {
    NotReady,
    /// Base64-encoded rendered document.
    Ready(String),
}

/// Result of one render reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Finished,
    Failed(String),
    /// Job missing or no longer running; nothing written.
    Skipped,
}

pub struct StatementService<S, B> {
    store: S,
    bus: B,
    template: Arc<dyn StatementTemplate>,
    renderer: Arc<dyn DocumentRenderer>,
    deadline: Duration,
}

impl<S, B> StatementService<S, B>
where
    S: ProjectionStore,
    B: EventBus<EventEnvelope>,
{
    /// `deadline` bounds how long a job may stay running before the sweep
    /// fails it.
    pub fn new<R>(store: S, bus: B, renderer: R, deadline: Duration) -> Self
    where
        R: DocumentRenderer + 'static,
    {
        Self {
            store,
            bus,
            template: Arc::new(HtmlStatementTemplate),
            renderer: Arc::new(renderer),
            deadline,
        }
    }

    pub fn with_template<T>(mut self, template: T) -> Self
    where
        T: StatementTemplate + 'static,
    {
        self.template = Arc::new(template);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admit a generation job for `number` and request rendering.
    ///
    /// Returns as soon as the request is published; poll with [`Self::get`].
    #[instrument(skip(self), fields(account_number = %number), err)]
    pub fn trigger(&self, number: AccountNumber) -> Result<StatementGenerationId, StatementError> {
        if self.store.account(number)?.is_none() {
            return Err(StatementError::AccountNotFound);
        }
        if self.store.has_running_generation(number)? {
            return Err(StatementError::AlreadyRunning);
        }

        let now = Utc::now();
        let mut job = StatementGeneration::start(StatementGenerationId::new(), number, now);
        match self.store.insert_generation(&job) {
            Ok(()) => {}
            // Lost the race against a concurrent admission.
            Err(StoreError::Conflict(_)) => return Err(StatementError::AlreadyRunning),
            Err(err) => return Err(err.into()),
        }

        let event = LedgerEvent::StatementGenerationRequested(StatementGenerationRequested {
            id: job.id(),
            account_number: number,
        });
        let published = EventEnvelope::seal(&event)
            .map_err(|e| e.to_string())
            .and_then(|envelope| self.bus.publish(envelope).map_err(|e| e.to_string()));

        if let Err(reason) = published {
            error!(job_id = %job.id(), error = %reason, "statement request not published");
            // Release the admission slot.
            if job.fail(format!("request not published: {reason}"), now).is_ok() {
                if let Err(err) = self.store.finish_generation(&job) {
                    error!(job_id = %job.id(), error = %err, "failed to finalize unpublished job");
                }
            }
            return Err(StatementError::Publish(reason));
        }

        info!(job_id = %job.id(), "statement generation admitted");
        Ok(job.id())
    }

    pub fn get(&self, id: StatementGenerationId) -> Result<StatementContent, StatementError> {
        let job = self.store.generation(id)?.ok_or(StatementError::NotFound)?;
        match job.status() {
            GenerationStatus::Running => Ok(StatementContent::NotReady),
            GenerationStatus::ErrorGenerating => Err(StatementError::GenerationFailed(
                job.error().unwrap_or("statement generation failed").to_string(),
            )),
            GenerationStatus::Finished => match job.content() {
                Some(content) => Ok(StatementContent::Ready(content.to_string())),
                None => Err(StatementError::GenerationFailed(
                    "finished statement has no content".to_string(),
                )),
            },
        }
    }

    /// The render reaction for job `id`.
    ///
    /// Store failures while finalizing are returned so the caller can retry;
    /// every other failure becomes the job's terminal error.
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub fn generate(&self, id: StatementGenerationId) -> Result<RenderOutcome, StatementError> {
        let Some(mut job) = self.store.generation(id)? else {
            warn!("statement generation requested for unknown job");
            return Ok(RenderOutcome::Skipped);
        };
        if !job.is_running() {
            info!(status = %job.status(), "statement generation already finished");
            return Ok(RenderOutcome::Skipped);
        }

        let rendered = self.render(job.account_number());
        let now = Utc::now();
        let outcome = match rendered {
            Ok(content) => {
                job.finish(content, now)
                    .map_err(|e| StatementError::GenerationFailed(e.to_string()))?;
                RenderOutcome::Finished
            }
            Err(reason) => {
                warn!(error = %reason, "statement generation failed");
                job.fail(reason.clone(), now)
                    .map_err(|e| StatementError::GenerationFailed(e.to_string()))?;
                RenderOutcome::Failed(reason)
            }
        };

        match self.store.finish_generation(&job) {
            Ok(()) => {
                info!(status = %job.status(), "statement generation finished");
                Ok(outcome)
            }
            Err(StoreError::Conflict(msg)) => {
                warn!(reason = %msg, "statement generation finalized elsewhere");
                Ok(RenderOutcome::Skipped)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Load, compile and render; any failure comes back as the error text.
    fn render(&self, number: AccountNumber) -> Result<String, String> {
        let account = self
            .store
            .account(number)
            .map_err(|e| format!("loading account: {e}"))?
            .ok_or_else(|| format!("account {number} not found"))?;
        let movements = self
            .store
            .movements(number)
            .map_err(|e| format!("loading movements: {e}"))?;

        let report = StatementReport::build(&account, &movements);
        let html = self
            .template
            .compile(&report)
            .map_err(|e| e.to_string())?;
        let bytes = self.renderer.render_html(&html).map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err(RenderError::EmptyDocument.to_string());
        }

        Ok(STANDARD.encode(bytes))
    }

    /// Fail every job still running past the deadline; returns how many.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, StatementError> {
        let Some(cutoff) = chrono::Duration::from_std(self.deadline)
            .ok()
            .and_then(|deadline| now.checked_sub_signed(deadline))
        else {
            return Ok(0);
        };

        let mut expired = 0;
        for mut job in self.store.running_generations_before(cutoff)? {
            if job.fail(TIMEOUT_MESSAGE, now).is_err() {
                continue;
            }
            match self.store.finish_generation(&job) {
                Ok(()) => {
                    warn!(job_id = %job.id(), account_number = %job.account_number(), "statement generation timed out");
                    expired += 1;
                }
                // Finished while we were sweeping.
                Err(StoreError::Conflict(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(expired)
    }
}

impl<S, B> EventHandler for StatementService<S, B>
where
    S: ProjectionStore,
    B: EventBus<EventEnvelope>,
{
    fn name(&self) -> &'static str {
        "statement"
    }

    fn accepts(&self, tag: EventTag) -> bool {
        tag == EventTag::StatementGenerationRequested
    }

    fn handle(
        &self,
        _envelope: &EventEnvelope,
        event: &LedgerEvent,
    ) -> Result<Handled, HandlerError> {
        let LedgerEvent::StatementGenerationRequested(request) = event else {
            return Ok(Handled::Skipped);
        };

        match self.generate(request.id) {
            Ok(RenderOutcome::Finished) | Ok(RenderOutcome::Failed(_)) => Ok(Handled::Applied),
            Ok(RenderOutcome::Skipped) => Ok(Handled::Skipped),
            Err(StatementError::Store(err)) => Err(err.into()),
            Err(err) => Err(HandlerError::Rejected(err.to_string())),
        }
    }
}

impl<S, B> core::fmt::Debug for StatementService<S, B>
where
    S: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StatementService")
            .field("store", &self.store)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use ledgerflow_core::{AccountName, Document};
    use ledgerflow_events::InMemoryEventBus;
    use ledgerflow_statements::{MirroredAccount, Movement};

    use crate::store::{InMemoryProjectionStore, ProjectionChange};

    type Service = StatementService<Arc<InMemoryProjectionStore>, Arc<InMemoryEventBus<EventEnvelope>>>;

    /// Echoes the HTML back as the "document" and remembers what it saw.
    #[derive(Default)]
    struct EchoRenderer {
        seen: Mutex<Vec<String>>,
    }

    impl DocumentRenderer for EchoRenderer {
        fn render_html(&self, html: &str) -> Result<Vec<u8>, RenderError> {
            self.seen.lock().unwrap().push(html.to_string());
            Ok(html.as_bytes().to_vec())
        }
    }

    struct DownRenderer;

    impl DocumentRenderer for DownRenderer {
        fn render_html(&self, _html: &str) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::Status {
                status: 503,
                message: "chromium unavailable".to_string(),
            })
        }
    }

    fn number() -> AccountNumber {
        AccountNumber::FIRST
    }

    fn store_with_account() -> Arc<InMemoryProjectionStore> {
        let store = Arc::new(InMemoryProjectionStore::new());
        let account = MirroredAccount::created(
            number(),
            Document::parse("01234567890").unwrap(),
            AccountName::parse("John Doe").unwrap(),
        );
        store
            .apply(
                ledgerflow_core::EventId::new(),
                ProjectionChange::CreateAccount(account.clone()),
            )
            .unwrap();
        let mut funded = account;
        funded.credit(150).unwrap();
        store
            .apply(
                ledgerflow_core::EventId::new(),
                ProjectionChange::UpdateAccount {
                    account: funded,
                    movement: Movement::deposit(number(), 150, Utc::now()),
                },
            )
            .unwrap();
        store
    }

    fn service<R: DocumentRenderer + 'static>(renderer: R) -> Service {
        StatementService::new(
            store_with_account(),
            Arc::new(InMemoryEventBus::new()),
            renderer,
            Duration::from_secs(300),
        )
    }

    #[test]
    fn trigger_admits_one_job_per_account() {
        let service = service(EchoRenderer::default());
        let id = service.trigger(number()).unwrap();

        assert_eq!(service.get(id).unwrap(), StatementContent::NotReady);
        assert_eq!(service.trigger(number()), Err(StatementError::AlreadyRunning));
    }

    #[test]
    fn trigger_for_unknown_account_creates_nothing() {
        let service = service(EchoRenderer::default());
        let unknown = AccountNumber::new(42).unwrap();

        assert_eq!(service.trigger(unknown), Err(StatementError::AccountNotFound));
        assert!(!service.store().has_running_generation(unknown).unwrap());
    }

    #[test]
    fn generate_stores_base64_document() {
        let renderer = Arc::new(EchoRenderer::default());
        let service = service(renderer.clone());
        let id = service.trigger(number()).unwrap();

        assert_eq!(service.generate(id).unwrap(), RenderOutcome::Finished);

        let html = renderer.seen.lock().unwrap()[0].clone();
        assert!(html.contains("R$ 1.50"));
        assert!(html.contains("Entrada"));

        match service.get(id).unwrap() {
            StatementContent::Ready(content) => {
                assert_eq!(STANDARD.decode(content).unwrap(), html.into_bytes());
            }
            other => panic!("unexpected content: {other:?}"),
        }

        // A redelivered request does not touch the finished job.
        assert_eq!(service.generate(id).unwrap(), RenderOutcome::Skipped);
        // The account can be admitted again.
        assert!(service.trigger(number()).is_ok());
    }

    #[test]
    fn renderer_failure_ends_in_error_state() {
        let service = service(DownRenderer);
        let id = service.trigger(number()).unwrap();

        assert!(matches!(service.generate(id).unwrap(), RenderOutcome::Failed(_)));
        match service.get(id) {
            Err(StatementError::GenerationFailed(msg)) => assert!(msg.contains("503")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!service.store().has_running_generation(number()).unwrap());
    }

    #[test]
    fn unknown_job_is_not_found() {
        let service = service(EchoRenderer::default());
        assert_eq!(
            service.get(StatementGenerationId::new()),
            Err(StatementError::NotFound)
        );
        assert_eq!(
            service.generate(StatementGenerationId::new()).unwrap(),
            RenderOutcome::Skipped
        );
    }

    #[test]
    fn sweep_fails_only_overdue_jobs() {
        let service = service(EchoRenderer::default());
        let id = service.trigger(number()).unwrap();

        assert_eq!(service.expire_stale(Utc::now()).unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(service.expire_stale(later).unwrap(), 1);

        assert_eq!(
            service.get(id),
            Err(StatementError::GenerationFailed(TIMEOUT_MESSAGE.to_string()))
        );
        // The render reaction arriving afterwards changes nothing.
        assert_eq!(service.generate(id).unwrap(), RenderOutcome::Skipped);
    }
}
