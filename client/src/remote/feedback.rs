//! Feedback and trace side channels.
//!
//! Both are fire-and-forget relative to the turn: completion and failure
//! are observed only for logging and transient notices, never fed back into
//! the turn state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::client::ChatServiceClient;
use super::error::{FeedbackError, TraceError};

/// Feedback payload for one run.
///
/// Explicit feedback is a `user_score` with score 1.0/0.0; implicit
/// feedback (e.g. following a source link) is `user_click` carrying the
/// URL in `value`. Passing a previously returned `feedback_id` updates the
/// existing record instead of creating a new one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub run_id: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
    pub is_explicit: bool,
}

impl FeedbackRequest {
    pub fn score(run_id: impl Into<String>, key: impl Into<String>, score: f64) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            score: Some(score),
            value: None,
            comment: None,
            feedback_id: None,
            is_explicit: true,
        }
    }

    pub fn click(run_id: impl Into<String>, key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            score: None,
            value: Some(url.into()),
            comment: None,
            feedback_id: None,
            is_explicit: false,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        if !comment.is_empty() {
            self.comment = Some(comment);
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackResponse {
    pub code: i64,
    #[serde(rename = "feedbackId")]
    pub feedback_id: String,
}

impl ChatServiceClient {
    /// Submit feedback for a run. A non-200 service code is a rejection.
    pub async fn send_feedback(
        &self,
        request: &FeedbackRequest,
    ) -> Result<FeedbackResponse, FeedbackError> {
        let url = format!("{}/feedback", self.base_url);
        let response = self.http.post(&url).json(request).send().await?;
        let payload: FeedbackResponse = response.json().await?;
        if payload.code != 200 {
            return Err(FeedbackError::Rejected { code: payload.code });
        }
        Ok(payload)
    }

    /// Look up the trace URL for a run. The service answers with either a
    /// quoted URL string or `{ "code": 400 }`.
    pub async fn trace_url(&self, run_id: &str) -> Result<String, TraceError> {
        let url = format!("{}/get_trace", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "run_id": run_id }))
            .send()
            .await?;
        let payload: JsonValue = response.json().await?;
        match payload {
            JsonValue::String(link) => {
                Ok(link.trim_matches(|c| c == '"' || c == '\'').to_string())
            }
            _ => Err(TraceError::Unavailable),
        }
    }
}

/// Submit feedback on a detached task. Completion is observed only for
/// logging, so the caller is never blocked on the side channel.
pub fn spawn_feedback(
    client: ChatServiceClient,
    request: FeedbackRequest,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match client.send_feedback(&request).await {
            Ok(response) => {
                tracing::debug!(
                    feedback_id = %response.feedback_id,
                    key = %request.key,
                    "Feedback recorded"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, key = %request.key, "Feedback submission failed");
            }
        }
    })
}
