use tracing::{debug, warn};

use crate::{
    dao::validator::{ValidationError, WordRules, WordVerdict},
    dto::validation::validate_word,
    services::engine::MatchEngine,
    state::events::MatchEvent,
};

impl MatchEngine {
    /// Check a word with the injected validator and report the outcome as an event.
    ///
    /// Only blank words are refused locally; the validator judges everything
    /// else.
    ///
    /// Without explicit `rules`, the language comes from the settings and the
    /// record flag from the match. Every outcome, including failures, emits
    /// either `validationResult` or `validationError`.
    pub async fn validate_word(
        &self,
        word: &str,
        rules: Option<WordRules>,
    ) -> Result<WordVerdict, ValidationError> {
        let word = word.trim().to_string();
        let rules = match rules {
            Some(rules) => rules,
            None => {
                let core = self.inner.core.lock().await;
                WordRules {
                    language: core.settings.language.clone(),
                    record_words: core.state.validate_record_words,
                }
            }
        };

        let result = self.check_word(&word, &rules).await;
        match &result {
            Ok(verdict) => {
                debug!(%word, valid = verdict.valid, "word validated");
                self.inner.hub.emit(MatchEvent::ValidationResult {
                    word,
                    verdict: verdict.clone(),
                });
            }
            Err(err) => {
                warn!(%word, error = %err, "word validation failed");
                self.inner.hub.emit(MatchEvent::ValidationError {
                    word,
                    message: err.to_string(),
                });
            }
        }
        result
    }

    async fn check_word(
        &self,
        word: &str,
        rules: &WordRules,
    ) -> Result<WordVerdict, ValidationError> {
        let Some(validator) = self.inner.validator.clone() else {
            return Err(ValidationError::NotConfigured);
        };
        validate_word(word).map_err(|err| ValidationError::InvalidWord {
            word: word.to_string(),
            reason: err.to_string(),
        })?;
        validator.validate(word, rules).await
    }
}
