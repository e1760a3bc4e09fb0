//! API client for the examination backend.
//!
//! This module provides the `ApiClient` struct covering the calls a
//! candidate makes: signing in, listing tests, and working through the
//! sections of an attempt. Privileged calls go through the `RequestGate`.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::gate::RequestGate;
use super::transport::{ApiRequest, ApiResponse};
use super::ApiError;
use crate::auth::Claims;
use crate::exam::SectionKind;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartedAttempt {
    #[serde(alias = "id")]
    pub attempt_id: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StartedAttempt {
    /// Attempt ids come back as numbers or strings depending on the backend.
    pub fn id(&self) -> String {
        match &self.attempt_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    gate: RequestGate,
    backoff_base_ms: u64,
}

impl ApiClient {
    pub fn new(gate: RequestGate) -> Self {
        Self {
            gate,
            backoff_base_ms: INITIAL_BACKOFF_MS,
        }
    }

    /// Override the first rate-limit backoff delay.
    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_base_ms = backoff_ms;
        self
    }

    // ===== Auth =====

    /// Sign in and adopt the issued token as the session credential.
    pub async fn login(&self, email: &str, password: &str) -> Result<Claims> {
        let body = serde_json::to_value(LoginRequest { email, password })?;
        let response = self
            .gate
            .send_public(ApiRequest::post("/auth/login", Some(body)))
            .await
            .context("Login request failed")?;

        let parsed: LoginResponse =
            serde_json::from_str(&response.body).context("Failed to parse login response")?;
        let claims = self
            .gate
            .session()
            .login(&parsed.token)
            .context("Backend issued an unusable token")?;
        info!(subject = %claims.subject, "Signed in");
        Ok(claims)
    }

    pub async fn register(&self, user: &Value) -> Result<Value> {
        let response = self
            .gate
            .send_public(ApiRequest::post("/auth/register", Some(user.clone())))
            .await
            .context("Registration request failed")?;
        Self::parse(&response, "/auth/register")
    }

    // ===== Candidate test room =====

    pub async fn available_tests(&self) -> Result<Vec<Value>> {
        self.get("/tests/available").await
    }

    pub async fn start_test_attempt(&self, scheduled_test_id: &str) -> Result<StartedAttempt> {
        self.post(&format!("/tests/{}/start", scheduled_test_id), None)
            .await
    }

    pub async fn section_content(&self, attempt_id: &str, section: SectionKind) -> Result<Value> {
        self.get(&format!(
            "/tests/attempts/{}/section/{}",
            attempt_id,
            section.wire_name()
        ))
        .await
    }

    pub async fn submit_section_answers(
        &self,
        attempt_id: &str,
        section: SectionKind,
        answers: &Value,
    ) -> Result<Value> {
        let body = json!({
            "sectionType": section.wire_name(),
            "answers": answers,
        });
        self.post(&format!("/tests/attempts/{}/submit-section", attempt_id), Some(body))
            .await
    }

    pub async fn finish_test_attempt(&self, attempt_id: &str) -> Result<Value> {
        self.post(&format!("/tests/attempts/{}/finish", attempt_id), None)
            .await
    }

    // ===== Plumbing =====

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send_with_retry(|| ApiRequest::get(path)).await?;
        Self::parse(&response, path)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T> {
        let response = self
            .send_with_retry(|| ApiRequest::post(path, body.clone()))
            .await?;
        Self::parse(&response, path)
    }

    /// Only rate limiting is retried. Each attempt passes the gate again, so
    /// a session that ends mid-backoff cancels the retry.
    async fn send_with_retry(&self, make: impl Fn() -> ApiRequest) -> Result<ApiResponse> {
        let mut retries = 0;
        let mut backoff_ms = self.backoff_base_ms;

        loop {
            let request = make();
            let path = request.path.clone();
            match self.gate.send(request).await {
                Err(ApiError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(path = %path, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("Request to {} failed", path)))
                }
                Ok(response) => return Ok(response),
            }
        }
    }

    fn parse<T: DeserializeOwned>(response: &ApiResponse, path: &str) -> Result<T> {
        // Some endpoints answer with an empty body
        let body = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(body)
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }
}

// ============================================================================
// Tests
// ============================================================================
