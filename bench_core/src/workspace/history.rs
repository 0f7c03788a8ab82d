use crate::workspace::{WorkspaceClient, WorkspaceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Debug, Clone)]
struct TimeRange {
    start_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time_ms: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
struct HistoryFilter {
    query_start_time_range: TimeRange,
    warehouse_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_ids: Option<Vec<i64>>,
}

#[derive(Serialize, Debug, Clone)]
struct HistoryRequest {
    filter_by: HistoryFilter,
    include_metrics: bool,
    max_results: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct QueryInfo {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub query_text: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub query_start_time_ms: Option<i64>,
    #[serde(default)]
    pub query_end_time_ms: Option<i64>,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct HistoryResponse {
    #[serde(default)]
    res: Vec<QueryInfo>,
}

/// Which slice of warehouse query history to fetch.
#[derive(Clone, Debug)]
pub struct HistoryQuery {
    pub warehouse_id: String,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub user_id: Option<i64>,
    pub max_results: u32,
}

impl WorkspaceClient {
    /// Fetches query history, re-polling every `poll_interval` until every
    /// entry is final (metrics of recently finished queries arrive late).
    #[tracing::instrument(skip(self, query), fields(warehouse_id = %query.warehouse_id))]
    pub async fn query_history(
        &self,
        query: &HistoryQuery,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<Vec<QueryInfo>, WorkspaceError> {
        let request = HistoryRequest {
            filter_by: HistoryFilter {
                query_start_time_range: TimeRange {
                    start_time_ms: query.start_time_ms,
                    end_time_ms: query.end_time_ms,
                },
                warehouse_ids: vec![query.warehouse_id.clone()],
                user_ids: query.user_id.map(|id| vec![id]),
            },
            include_metrics: true,
            max_results: query.max_results,
        };

        let mut polls = 0;
        loop {
            let response: HistoryResponse = self
                .get_with_body("/api/2.0/sql/history/queries", &request)
                .await?;
            polls += 1;
            if response.res.iter().all(|q| q.is_final) || polls >= max_polls {
                tracing::info!(queries = response.res.len(), polls, "query history extracted");
                return Ok(response.res);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
