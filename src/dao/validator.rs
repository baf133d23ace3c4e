use std::{error::Error, future::Future};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rules forwarded to the validator with each word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordRules {
    /// Language code of the dictionary to check against.
    pub language: String,
    /// Whether the word is a record attempt that must be strictly validated.
    pub record_words: bool,
}

/// Validator answer for one word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordVerdict {
    /// Whether the word is accepted.
    pub valid: bool,
    /// Optional explanation from the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Failures of the word validation pass-through.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No validator was injected into the engine.
    #[error("no word validator configured")]
    NotConfigured,
    /// The word was rejected before reaching the validator.
    #[error("invalid word `{word}`: {reason}")]
    InvalidWord {
        /// Submitted word.
        word: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The request could not be completed.
    #[error("word validation request failed: {message}")]
    Request {
        /// What was being attempted.
        message: String,
        /// Transport failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The validator answered with a non-success status.
    #[error("word validator responded with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The validator's answer could not be parsed.
    #[error("failed to decode word validator response")]
    Decode {
        /// Parsing failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// Abstraction over the remote word-validator collaborator.
pub trait WordValidator: Send + Sync {
    /// Check `word` under `rules`.
    fn validate(
        &self,
        word: &str,
        rules: &WordRules,
    ) -> BoxFuture<'static, Result<WordVerdict, ValidationError>>;
}

impl<F, Fut> WordValidator for F
where
    F: Fn(String, WordRules) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WordVerdict, ValidationError>> + Send + 'static,
{
    fn validate(
        &self,
        word: &str,
        rules: &WordRules,
    ) -> BoxFuture<'static, Result<WordVerdict, ValidationError>> {
        self(word.to_string(), rules.clone()).boxed()
    }
}
