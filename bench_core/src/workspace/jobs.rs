use crate::http::retry::HttpContext;
use crate::workspace::{WorkspaceClient, WorkspaceError};
use reqwest::Method;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CreateJobResponse {
    pub job_id: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RunNowResponse {
    pub run_id: i64,
    #[serde(default)]
    pub number_in_job: Option<i64>,
}

#[derive(Serialize)]
struct RunNowRequest {
    job_id: i64,
    idempotency_token: String,
}

impl WorkspaceClient {
    /// Submits a job definition as-is; the Jobs API validates its schema.
    #[tracing::instrument(skip(self, settings))]
    pub async fn create_job(
        &self,
        settings: &serde_json::Value,
    ) -> Result<CreateJobResponse, WorkspaceError> {
        let ctx = HttpContext::new(Method::POST, "/api/2.1/jobs/create");
        let response: CreateJobResponse =
            self.post("/api/2.1/jobs/create", settings, ctx).await?;
        tracing::info!(job_id = response.job_id, "created job");
        Ok(response)
    }

    /// Triggers a run. The idempotency token makes a retried request start
    /// at most one run.
    #[tracing::instrument(skip(self))]
    pub async fn run_job_now(&self, job_id: i64) -> Result<RunNowResponse, WorkspaceError> {
        let ctx = HttpContext::new(Method::POST, "/api/2.1/jobs/run-now").idempotent();
        let request = RunNowRequest {
            job_id,
            idempotency_token: uuid::Uuid::new_v4().to_string(),
        };
        let response: RunNowResponse = self.post("/api/2.1/jobs/run-now", &request, ctx).await?;
        tracing::info!(job_id, run_id = response.run_id, "triggered job run");
        Ok(response)
    }
}
