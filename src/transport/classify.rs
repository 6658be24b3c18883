//! Decide whether a channel failure means the API key is bad.

use super::ChannelFailure;
use crate::config::CredentialConfig;
use std::fmt;
use std::sync::Arc;

/// Custom test for credential failures.
pub type FailurePredicate = Arc<dyn Fn(&ChannelFailure) -> bool + Send + Sync>;

/// What a failure means for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The key is missing, invalid, or lacks access; prompt for a new one.
    Credential,
    /// Anything else.
    Network,
}

/// Maps channel failures to a [`FailureClass`].
///
/// A failure is a credential failure if its handshake status is listed, its
/// detail contains one of the patterns (case-insensitive), or the custom
/// predicate accepts it.
#[derive(Clone, Default)]
pub struct ErrorClassifier {
    patterns: Vec<String>,
    statuses: Vec<u16>,
    predicate: Option<FailurePredicate>,
}

impl ErrorClassifier {
    /// Classifier over explicit patterns and handshake statuses.
    #[must_use]
    pub fn new<I, S>(patterns: I, statuses: Vec<u16>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            statuses,
            predicate: None,
        }
    }

    /// Classifier configured from the credentials section.
    #[must_use]
    pub fn from_config(config: &CredentialConfig) -> Self {
        Self::new(&config.error_patterns, config.error_statuses.clone())
    }

    /// Also treat failures accepted by `predicate` as credential failures.
    #[must_use]
    pub fn with_predicate(mut self, predicate: FailurePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Classify a failure.
    #[must_use]
    pub fn classify(&self, failure: &ChannelFailure) -> FailureClass {
        if self.is_credential_failure(failure) {
            FailureClass::Credential
        } else {
            FailureClass::Network
        }
    }

    fn is_credential_failure(&self, failure: &ChannelFailure) -> bool {
        if let ChannelFailure::Connect {
            status: Some(status),
            ..
        } = failure
            && self.statuses.contains(status)
        {
            return true;
        }

        let detail = failure.detail().to_lowercase();
        if self.patterns.iter().any(|p| detail.contains(p.as_str())) {
            return true;
        }

        self.predicate.as_ref().is_some_and(|p| p(failure))
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("patterns", &self.patterns)
            .field("statuses", &self.statuses)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
