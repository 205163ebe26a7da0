//! Per-container outcomes of a batch.

use xlxc_common::{XlxcError, XlxcResult};

/// What happened to one subject (container or bridge) of a batch.
#[derive(Debug)]
pub enum Outcome {
    /// Completed.
    Done,
    /// Not attempted, for an advisory reason.
    Skipped(XlxcError),
    /// Attempted and abandoned.
    Failed(XlxcError),
}

/// Outcomes of a batch in the order the subjects were processed.
///
/// A batch is not atomic: one failed subject never stops its siblings,
/// so callers inspect the report instead of a single result.
#[derive(Debug, Default)]
pub struct BatchReport {
    entries: Vec<(String, Outcome)>,
}

impl BatchReport {
    /// An empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of processing `subject`.
    ///
    /// Advisory errors are recorded as skips, all others as failures.
    pub fn record(&mut self, subject: impl Into<String>, result: XlxcResult<()>) {
        let subject = subject.into();
        let outcome = match result {
            Ok(()) => {
                tracing::info!(subject = %subject, "Done");
                Outcome::Done
            }
            Err(e) if e.is_advisory() => {
                tracing::warn!(subject = %subject, reason = %e, "Skipped");
                Outcome::Skipped(e)
            }
            Err(e) => {
                tracing::error!(subject = %subject, error = %e, "Failed");
                Outcome::Failed(e)
            }
        };
        self.entries.push((subject, outcome));
    }

    /// Record that `subject` was not attempted.
    pub fn skip(&mut self, subject: impl Into<String>, reason: XlxcError) {
        let subject = subject.into();
        tracing::warn!(subject = %subject, reason = %reason, "Skipped");
        self.entries.push((subject, Outcome::Skipped(reason)));
    }

    /// All outcomes.
    #[must_use]
    pub fn entries(&self) -> &[(String, Outcome)] {
        &self.entries
    }

    /// Take the outcomes.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, Outcome)> {
        self.entries
    }

    /// Outcome for `subject`, if it was processed.
    #[must_use]
    pub fn outcome(&self, subject: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, outcome)| outcome)
    }

    /// Subjects that completed.
    pub fn done(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Done))
            .map(|(s, _)| s.as_str())
    }

    /// Subjects that failed, with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &XlxcError)> {
        self.entries.iter().filter_map(|(s, o)| match o {
            Outcome::Failed(e) => Some((s.as_str(), e)),
            _ => None,
        })
    }

    /// Whether no subject failed. Skips do not count as failures.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}
