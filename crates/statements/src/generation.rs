//! Statement generation job.
//!
//! ```text
//! running ──finish──▶ finished
//!    │
//!    └────fail─────▶ errorGenerating
//! ```
//!
//! Both terminal states are final: a job never re-enters `running` and is
//! finalized exactly once.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountNumber, DomainError, DomainResult, StatementGenerationId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "errorGenerating")]
    ErrorGenerating,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Running => "running",
            GenerationStatus::Finished => "finished",
            GenerationStatus::ErrorGenerating => "errorGenerating",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationStatus::Running)
    }
}

impl core::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(GenerationStatus::Running),
            "finished" => Ok(GenerationStatus::Finished),
            "errorGenerating" => Ok(GenerationStatus::ErrorGenerating),
            other => Err(DomainError::invalid_value(format!(
                "unknown generation status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementGeneration {
    id: StatementGenerationId,
    account_number: AccountNumber,
    status: GenerationStatus,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    /// Base64-encoded rendered artifact.
    content: Option<String>,
}

impl StatementGeneration {
    /// A newly admitted job.
    pub fn start(
        id: StatementGenerationId,
        account_number: AccountNumber,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account_number,
            status: GenerationStatus::Running,
            created_at: at,
            finished_at: None,
            error: None,
            content: None,
        }
    }

    pub fn restore(
        id: StatementGenerationId,
        account_number: AccountNumber,
        status: GenerationStatus,
        created_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        error: Option<String>,
        content: Option<String>,
    ) -> Self {
        Self {
            id,
            account_number,
            status,
            created_at,
            finished_at,
            error,
            content,
        }
    }

    pub fn id(&self) -> StatementGenerationId {
        self.id
    }

    pub fn account_number(&self) -> AccountNumber {
        self.account_number
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == GenerationStatus::Running
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Running jobs created before `deadline` are overdue.
    pub fn is_overdue(&self, deadline: DateTime<Utc>) -> bool {
        self.is_running() && self.created_at < deadline
    }

    /// Terminal success with the base64 artifact.
    pub fn finish(&mut self, content: String, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_running()?;
        if content.is_empty() {
            return Err(DomainError::invalid_value(
                "finished statement must carry content",
            ));
        }
        self.status = GenerationStatus::Finished;
        self.content = Some(content);
        self.finished_at = Some(at);
        Ok(())
    }

    /// Terminal failure with a non-empty error text.
    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_running()?;
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "statement generation failed".to_string();
        }
        self.status = GenerationStatus::ErrorGenerating;
        self.error = Some(error);
        self.finished_at = Some(at);
        Ok(())
    }

    fn ensure_running(&self) -> DomainResult<()> {
        if !self.is_running() {
            return Err(DomainError::conflict(format!(
                "statement generation {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn job() -> StatementGeneration {
        StatementGeneration::start(
            StatementGenerationId::new(),
            AccountNumber::FIRST,
            test_time(),
        )
    }

    #[test]
    fn finish_is_terminal() {
        let mut job = job();
        job.finish("JVBERi0=".to_string(), test_time()).unwrap();

        assert_eq!(job.status(), GenerationStatus::Finished);
        assert_eq!(job.content(), Some("JVBERi0="));
        assert_eq!(job.error(), None);

        assert!(matches!(
            job.fail("late failure", test_time()),
            Err(DomainError::Conflict(_))
        ));
        assert!(job.finish("again".to_string(), test_time()).is_err());
        assert_eq!(job.status(), GenerationStatus::Finished);
    }

    #[test]
    fn fail_always_records_an_error() {
        let mut job = job();
        job.fail("", test_time()).unwrap();

        assert_eq!(job.status(), GenerationStatus::ErrorGenerating);
        assert!(!job.error().unwrap().is_empty());
        assert_eq!(job.content(), None);
        assert!(job.finished_at().is_some());
    }

    #[test]
    fn empty_content_does_not_finish() {
        let mut job = job();
        assert!(job.finish(String::new(), test_time()).is_err());
        assert!(job.is_running());
    }

    #[test]
    fn overdue_only_while_running() {
        let mut job = job();
        let later = test_time() + Duration::seconds(301);

        assert!(job.is_overdue(later));
        assert!(!job.is_overdue(test_time()));

        job.fail("boom", later).unwrap();
        assert!(!job.is_overdue(later));
    }

    #[test]
    fn status_uses_wire_names() {
        assert_eq!(GenerationStatus::ErrorGenerating.as_str(), "errorGenerating");
        assert_eq!(
            "errorGenerating".parse::<GenerationStatus>().unwrap(),
            GenerationStatus::ErrorGenerating
        );
        assert!("done".parse::<GenerationStatus>().is_err());
    }
}
