//! HTTP implementation of the word validator.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::Serialize;

use crate::{
    config::ValidatorConfig,
    dao::validator::{ValidationError, WordRules, WordValidator, WordVerdict},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    word: &'a str,
    language: &'a str,
    record_words: bool,
}

/// Client posting words to `{base_url}/validate`.
#[derive(Clone)]
pub struct HttpWordValidator {
    client: Client,
    endpoint: Arc<str>,
}

impl HttpWordValidator {
    /// Build the client with the configured timeout.
    pub fn new(config: ValidatorConfig) -> Result<Self, ValidationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| ValidationError::Request {
                message: "building HTTP client".into(),
                source: Box::new(source),
            })?;

        let endpoint = Arc::<str>::from(format!(
            "{}/validate",
            config.base_url.trim_end_matches('/')
        ));

        Ok(Self { client, endpoint })
    }

    /// Full URL words are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl WordValidator for HttpWordValidator {
    fn validate(
        &self,
        word: &str,
        rules: &WordRules,
    ) -> BoxFuture<'static, Result<WordVerdict, ValidationError>> {
        let body = serde_json::to_value(ValidateRequest {
            word,
            language: &rules.language,
            record_words: rules.record_words,
        });
        let request = self.client.post(self.endpoint.as_ref());

        async move {
            let body = body.map_err(|source| ValidationError::Request {
                message: "encoding request".into(),
                source: Box::new(source),
            })?;

            let response =
                request
                    .json(&body)
                    .send()
                    .await
                    .map_err(|source| ValidationError::Request {
                        message: "sending request".into(),
                        source: Box::new(source),
                    })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ValidationError::Status {
                    status: status.as_u16(),
                });
            }

            response
                .json::<WordVerdict>()
                .await
                .map_err(|source| ValidationError::Decode {
                    source: Box::new(source),
                })
        }
        .boxed()
    }
}
