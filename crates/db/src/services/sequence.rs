use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::warn;

use signoff_core::config::WorkflowConfig;
use signoff_core::errors::WorkflowError;
use signoff_core::sequence::{
    date_key, format_document_number, validate_pad_length, validate_prefix, DocumentNumber,
    Uniqueness, DEFAULT_PAD_LENGTH,
};

use crate::repositories::SequenceRepository;

/// Issues `PREFIX + YYYYMMDD + NNN` numbers from the atomic day counter.
///
/// With `count_fallback` enabled, a failing counter store degrades to
/// `count(existing numbers for the day) + 1`. Those numbers are marked
/// [`Uniqueness::BestEffort`]: concurrent callers may receive the same value.
#[derive(Clone)]
pub struct SequenceGenerator {
    repository: Arc<dyn SequenceRepository>,
    pad_length: usize,
    count_fallback: bool,
}

impl SequenceGenerator {
    pub fn new(repository: Arc<dyn SequenceRepository>) -> Self {
        Self { repository, pad_length: DEFAULT_PAD_LENGTH, count_fallback: false }
    }

    pub fn from_config(
        repository: Arc<dyn SequenceRepository>,
        config: &WorkflowConfig,
    ) -> Result<Self, WorkflowError> {
        Self::new(repository)
            .with_pad_length(config.sequence_pad_length)
            .map(|generator| generator.with_count_fallback(config.sequence_count_fallback))
    }

    pub fn with_pad_length(mut self, pad_length: usize) -> Result<Self, WorkflowError> {
        validate_pad_length(pad_length)?;
        self.pad_length = pad_length;
        Ok(self)
    }

    pub fn with_count_fallback(mut self, enabled: bool) -> Self {
        self.count_fallback = enabled;
        self
    }

    /// Next number for today in local time.
    pub async fn next(&self, prefix: &str) -> Result<DocumentNumber, WorkflowError> {
        self.next_on(prefix, Local::now().date_naive()).await
    }

    pub async fn next_on(
        &self,
        prefix: &str,
        date: NaiveDate,
    ) -> Result<DocumentNumber, WorkflowError> {
        validate_prefix(prefix)?;
        let key = date_key(date);

        let (counter, uniqueness) = match self.repository.increment(prefix, &key).await {
            Ok(counter) => (counter, Uniqueness::Guaranteed),
            Err(error) if self.count_fallback => {
                warn!(
                    event_name = "sequence.counter.fallback",
                    correlation_id = "sequence",
                    prefix = %prefix,
                    date_key = %key,
                    error = %error,
                    "atomic counter unavailable, issuing best-effort number"
                );
                let stem = format!("{prefix}{key}");
                let issued = self.repository.count_issued(&stem).await.map_err(|count_error| {
                    WorkflowError::SequenceUnavailable {
                        prefix: prefix.to_owned(),
                        message: count_error.to_string(),
                    }
                })?;
                (issued + 1, Uniqueness::BestEffort)
            }
            Err(error) => {
                return Err(WorkflowError::SequenceUnavailable {
                    prefix: prefix.to_owned(),
                    message: error.to_string(),
                })
            }
        };

        Ok(DocumentNumber {
            value: format_document_number(prefix, date, counter, self.pad_length),
            prefix: prefix.to_owned(),
            date_key: key,
            counter,
            uniqueness,
        })
    }
}
