use crate::http::retry::HttpContext;
use crate::workspace::{WorkspaceClient, WorkspaceError};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct CreateTokenRequest<'a> {
    comment: &'a str,
    lifetime_seconds: u64,
}

#[derive(Deserialize)]
struct CreateTokenResponse {
    token_value: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CurrentUser {
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl WorkspaceClient {
    /// Creates a personal access token that expires after `lifetime`.
    #[tracing::instrument(skip(self))]
    pub async fn create_token(
        &self,
        comment: &str,
        lifetime: Duration,
    ) -> Result<String, WorkspaceError> {
        let ctx = HttpContext::new(Method::POST, "/api/2.0/token/create");
        let request = CreateTokenRequest {
            comment,
            lifetime_seconds: lifetime.as_secs(),
        };
        let response: CreateTokenResponse =
            self.post("/api/2.0/token/create", &request, ctx).await?;
        Ok(response.token_value)
    }

    pub async fn current_user(&self) -> Result<CurrentUser, WorkspaceError> {
        self.get("/api/2.0/preview/scim/v2/Me", &[] as &[(&str, &str)])
            .await
    }
}
