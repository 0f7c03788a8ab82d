//! SQL Statement Execution API.

use crate::http::retry::HttpContext;
use crate::workspace::{
    Empty, StatementFailedSnafu, WaitDeadlineSnafu, WorkspaceClient, WorkspaceError,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strum::Display;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Inline,
    ExternalLinks,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Format {
    JsonArray,
    ArrowStream,
}

#[derive(Serialize, Debug, Clone)]
pub struct StatementRequest {
    pub statement: String,
    pub warehouse_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub wait_timeout: String,
    pub on_wait_timeout: String,
    pub disposition: Disposition,
    pub format: Format,
}

impl StatementRequest {
    pub fn new(statement: impl Into<String>, warehouse_id: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            warehouse_id: warehouse_id.into(),
            catalog: None,
            schema: None,
            wait_timeout: "50s".to_string(),
            on_wait_timeout: "CONTINUE".to_string(),
            disposition: Disposition::Inline,
            format: Format::JsonArray,
        }
    }

    pub fn in_schema(mut self, catalog: Option<String>, schema: Option<String>) -> Self {
        self.catalog = catalog;
        self.schema = schema;
        self
    }

    /// Leaves result data on cloud storage; only the manifest comes back.
    pub fn external_links(mut self) -> Self {
        self.disposition = Disposition::ExternalLinks;
        self.format = Format::ArrowStream;
        self
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

impl StatementState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatementState::Pending | StatementState::Running)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StatementError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StatementStatus {
    pub state: StatementState,
    #[serde(default)]
    pub error: Option<StatementError>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ResultManifest {
    #[serde(default)]
    pub total_row_count: Option<i64>,
    #[serde(default)]
    pub total_chunk_count: Option<i64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ResultData {
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub data_array: Option<Vec<Vec<Option<String>>>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StatementResponse {
    pub statement_id: String,
    pub status: StatementStatus,
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultData>,
}

impl StatementResponse {
    pub fn row_count(&self) -> Option<i64> {
        self.manifest
            .as_ref()
            .and_then(|m| m.total_row_count)
            .or_else(|| self.result.as_ref().and_then(|r| r.row_count))
    }

    pub fn error_message(&self) -> String {
        self.status
            .error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("statement ended in state {}", self.status.state))
    }
}

/// How long to keep polling a statement that outlived the server-side wait.
#[derive(Clone, Debug)]
pub struct StatementPolling {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for StatementPolling {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements/";

impl WorkspaceClient {
    pub async fn submit_statement(
        &self,
        request: &StatementRequest,
    ) -> Result<StatementResponse, WorkspaceError> {
        let ctx = HttpContext::new(Method::POST, STATEMENTS_PATH);
        self.post(STATEMENTS_PATH, request, ctx).await
    }

    pub async fn get_statement(&self, statement_id: &str) -> Result<StatementResponse, WorkspaceError> {
        self.get(
            &format!("{STATEMENTS_PATH}{statement_id}"),
            &[] as &[(&str, &str)],
        )
        .await
    }

    pub async fn cancel_statement(&self, statement_id: &str) -> Result<(), WorkspaceError> {
        let path = format!("{STATEMENTS_PATH}{statement_id}/cancel");
        let ctx = HttpContext::new(Method::POST, &path).idempotent();
        let _: Empty = self.post(&path, &serde_json::json!({}), ctx).await?;
        Ok(())
    }

    /// Submits the statement and polls until it reaches a terminal state.
    /// The terminal response is returned whatever the state. A statement
    /// still running at the deadline is cancelled.
    #[tracing::instrument(skip(self, request, polling), fields(warehouse_id = %request.warehouse_id))]
    pub async fn execute_statement(
        &self,
        request: &StatementRequest,
        polling: &StatementPolling,
    ) -> Result<StatementResponse, WorkspaceError> {
        let started = Instant::now();
        let mut response = self.submit_statement(request).await?;

        while !response.status.state.is_terminal() {
            if started.elapsed() + polling.poll_interval > polling.timeout {
                if let Err(e) = self.cancel_statement(&response.statement_id).await {
                    tracing::warn!(
                        statement_id = %response.statement_id,
                        error = %snafu::Report::from_error(e),
                        "could not cancel statement"
                    );
                }
                return WaitDeadlineSnafu {
                    what: format!("statement {}", response.statement_id),
                    timeout: polling.timeout,
                }
                .fail();
            }
            tokio::time::sleep(polling.poll_interval).await;
            response = self.get_statement(&response.statement_id).await?;
        }

        tracing::debug!(
            statement_id = %response.statement_id,
            state = %response.status.state,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "statement finished"
        );
        Ok(response)
    }

    /// Like [`execute_statement`](Self::execute_statement) but anything
    /// other than SUCCEEDED is an error.
    pub async fn execute_statement_checked(
        &self,
        request: &StatementRequest,
        polling: &StatementPolling,
    ) -> Result<StatementResponse, WorkspaceError> {
        let response = self.execute_statement(request, polling).await?;
        if response.status.state != StatementState::Succeeded {
            return StatementFailedSnafu {
                statement_id: response.statement_id.clone(),
                state: response.status.state.to_string(),
                message: response.error_message(),
            }
            .fail();
        }
        Ok(response)
    }
}
