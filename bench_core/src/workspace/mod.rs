//! Minimal client for the workspace REST APIs the benchmark tooling needs.
//!
//! Every call goes through [`crate::http::retry::execute_with_retry`] and
//! decodes the platform's `{error_code, message}` body on failure.

pub mod clusters;
pub mod dbfs;
mod error;
pub mod history;
pub mod identity;
pub mod jobs;
pub mod statements;
pub mod warehouses;

pub use error::*;

use crate::config::workspace::{Cloud, WorkspaceConfig};
use crate::http::retry::{HttpContext, execute_with_retry};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

#[derive(serde::Deserialize, Debug, Default)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct WorkspaceClient {
    config: WorkspaceConfig,
    http: reqwest::Client,
}

impl WorkspaceClient {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn cloud(&self) -> Option<Cloud> {
        self.config.cloud()
    }

    /// The underlying HTTP client, shared with non-API downloads.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Returns a client that authenticates with `token` instead.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        let mut config = self.config.clone();
        config.token = token.into();
        Self {
            config,
            http: self.http.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.host, path.trim_start_matches('/'))
    }

    pub(crate) async fn get<Q, T>(&self, path: &str, query: &Q) -> Result<T, WorkspaceError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let ctx = HttpContext::new(Method::GET, path);
        let request = || {
            self.http
                .get(&url)
                .bearer_auth(&self.config.token)
                .query(query)
        };
        self.send(request, &ctx).await
    }

    pub(crate) async fn post<B, T>(
        &self,
        path: &str,
        body: &B,
        ctx: HttpContext,
    ) -> Result<T, WorkspaceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let request = || {
            self.http
                .post(&url)
                .bearer_auth(&self.config.token)
                .json(body)
        };
        self.send(request, &ctx).await
    }

    /// GET with a JSON body, which the query history endpoint expects.
    pub(crate) async fn get_with_body<B, T>(&self, path: &str, body: &B) -> Result<T, WorkspaceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let ctx = HttpContext::new(Method::GET, path);
        let request = || {
            self.http
                .get(&url)
                .bearer_auth(&self.config.token)
                .json(body)
        };
        self.send(request, &ctx).await
    }

    async fn send<B, T>(&self, request: B, ctx: &HttpContext) -> Result<T, WorkspaceError>
    where
        B: Fn() -> reqwest::RequestBuilder,
        T: DeserializeOwned,
    {
        let response = execute_with_retry(request, ctx, &self.config.retry)
            .await
            .context(HttpSnafu {
                endpoint: ctx.endpoint.clone(),
            })?;
        read_response_json(&ctx.endpoint, response).await
    }
}

async fn read_response_json<T>(endpoint: &str, response: reqwest::Response) -> Result<T, WorkspaceError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response
        .text()
        .await
        .context(ResponseTextSnafu { endpoint })?;

    if !status.is_success() {
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
        tracing::error!(endpoint, %status, body = %text, "workspace API call failed");
        return ApiSnafu {
            endpoint,
            status,
            error_code: body.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
            message: body.message.unwrap_or(text),
        }
        .fail();
    }

    // Some endpoints (mkdirs, close, start) answer with an empty body.
    let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
    serde_json::from_str(text).context(ResponseFormatSnafu { endpoint })
}

/// Response of endpoints that return nothing of interest.
#[derive(serde::Deserialize, Debug, Default)]
pub struct Empty {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_join_paths_onto_host() {
        let client = WorkspaceClient::new(
            WorkspaceConfig::new("https://dbc-1.cloud.databricks.com/", "t").unwrap(),
        );

        assert_eq!(
            client.url("/api/2.0/dbfs/list"),
            "https://dbc-1.cloud.databricks.com/api/2.0/dbfs/list"
        );
        assert_eq!(client.cloud(), Some(Cloud::Aws));
    }

    #[test]
    fn should_swap_token() {
        let client = WorkspaceClient::new(WorkspaceConfig::new("example.com", "old").unwrap());

        let swapped = client.with_token("new");

        assert_eq!(swapped.config().token, "new");
        assert_eq!(client.config().token, "old");
    }
}
