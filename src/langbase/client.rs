use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    CreatePipeRequest, CreatePipeResponse, Message, PipeRequest, PipeResponse, PipeStatus,
};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Run a pipe, retrying transport failures and 5xx responses with exponential backoff.
    ///
    /// 4xx responses are returned immediately: a rejected request will not
    /// succeed on a second attempt.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                warn!(
                    pipe = %request.name,
                    retry = attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase pipe"
                );
                tokio::time::sleep(delay).await;
            }

            debug!(
                pipe = %request.name,
                messages = request.messages.len(),
                "Running Langbase pipe"
            );

            let start = Instant::now();
            let result: LangbaseResult<PipeResponse> = self.post_json(&url, &request).await;
            let latency_ms = start.elapsed().as_millis();

            match result {
                Ok(response) => {
                    info!(pipe = %request.name, latency_ms, "Langbase pipe call succeeded");
                    return Ok(response);
                }
                Err(e) if !is_retryable(&e) => {
                    error!(pipe = %request.name, error = %e, latency_ms, "Langbase pipe rejected request");
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        pipe = %request.name,
                        error = %e,
                        latency_ms,
                        retry = attempt,
                        "Langbase pipe call failed"
                    );
                    if attempt >= self.request_config.max_retries {
                        return Err(LangbaseError::Unavailable {
                            message: e.to_string(),
                            retries: attempt,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Create (or upsert) a pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");
        let response: CreatePipeResponse = self.post_json(&url, &request).await?;
        info!(pipe = %response.name, url = %response.url, "Pipe created");

        Ok(response)
    }

    /// Ensure a pipe exists with the given system prompt, creating it if needed
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
        json_output: bool,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description(description)
            .with_status(PipeStatus::Private)
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_json_output(json_output)
            .with_temperature(0.7)
            .with_max_tokens(400)
            .with_messages(vec![Message::system(system_prompt)]);

        match self.create_pipe(request).await {
            Ok(_) => Ok(()),
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.request_config
                .retry_delay_ms
                .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> LangbaseResult<T> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

fn is_retryable(err: &LangbaseError) -> bool {
    match err {
        LangbaseError::Api { status, .. } => *status >= 500 || *status == 429,
        LangbaseError::InvalidResponse { .. } => false,
        _ => true,
    }
}
