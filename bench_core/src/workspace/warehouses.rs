use crate::config::retry::WaitPolicy;
use crate::http::retry::HttpContext;
use crate::workspace::{
    Empty, WaitDeadlineSnafu, WarehouseFailedSnafu, WorkspaceClient, WorkspaceError,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strum::Display;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WarehouseState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl WarehouseState {
    fn is_failure(self) -> bool {
        matches!(
            self,
            WarehouseState::Stopped | WarehouseState::Deleting | WarehouseState::Deleted
        )
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WarehouseHealth {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Warehouse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<WarehouseState>,
    #[serde(default)]
    pub cluster_size: Option<String>,
    #[serde(default)]
    pub max_num_clusters: Option<i64>,
    #[serde(default)]
    pub health: Option<WarehouseHealth>,
}

#[derive(Deserialize, Debug, Default)]
struct ListWarehousesResponse {
    #[serde(default)]
    warehouses: Vec<Warehouse>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WarehouseChannel {
    pub name: String,
}

/// Body of a warehouse create request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WarehouseSpec {
    pub name: String,
    pub cluster_size: String,
    pub min_num_clusters: usize,
    pub max_num_clusters: usize,
    pub auto_stop_mins: u32,
    pub warehouse_type: String,
    pub enable_serverless_compute: bool,
    pub enable_photon: bool,
    pub spot_instance_policy: String,
    pub channel: WarehouseChannel,
}

#[derive(Deserialize)]
struct CreateWarehouseResponse {
    id: String,
}

impl WorkspaceClient {
    pub async fn list_warehouses(&self) -> Result<Vec<Warehouse>, WorkspaceError> {
        let response: ListWarehousesResponse = self
            .get("/api/2.0/sql/warehouses", &[] as &[(&str, &str)])
            .await?;
        Ok(response.warehouses)
    }

    pub async fn get_warehouse(&self, id: &str) -> Result<Warehouse, WorkspaceError> {
        self.get(&format!("/api/2.0/sql/warehouses/{id}"), &[] as &[(&str, &str)])
            .await
    }

    /// Id of the first warehouse whose name matches exactly.
    #[tracing::instrument(skip(self))]
    pub async fn find_warehouse_id(&self, name: &str) -> Result<Option<String>, WorkspaceError> {
        Ok(self
            .list_warehouses()
            .await?
            .into_iter()
            .find(|w| w.name == name)
            .map(|w| w.id))
    }

    #[tracing::instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create_warehouse(&self, spec: &WarehouseSpec) -> Result<String, WorkspaceError> {
        let ctx = HttpContext::new(Method::POST, "/api/2.0/sql/warehouses");
        let response: CreateWarehouseResponse =
            self.post("/api/2.0/sql/warehouses", spec, ctx).await?;
        tracing::info!(warehouse_id = %response.id, "created warehouse");
        Ok(response.id)
    }

    /// Reuses the warehouse named `spec.name` when one exists, otherwise
    /// creates it.
    pub async fn ensure_warehouse(&self, spec: &WarehouseSpec) -> Result<String, WorkspaceError> {
        if let Some(id) = self.find_warehouse_id(&spec.name).await? {
            tracing::info!(warehouse_id = %id, name = %spec.name, "using existing warehouse");
            return Ok(id);
        }
        self.create_warehouse(spec).await
    }

    pub async fn start_warehouse(&self, id: &str) -> Result<(), WorkspaceError> {
        let path = format!("/api/2.0/sql/warehouses/{id}/start");
        let ctx = HttpContext::new(Method::POST, path.clone()).idempotent();
        let _: Empty = self.post(&path, &serde_json::json!({}), ctx).await?;
        Ok(())
    }

    pub async fn stop_warehouse(&self, id: &str) -> Result<(), WorkspaceError> {
        let path = format!("/api/2.0/sql/warehouses/{id}/stop");
        let ctx = HttpContext::new(Method::POST, path.clone()).idempotent();
        let _: Empty = self.post(&path, &serde_json::json!({}), ctx).await?;
        Ok(())
    }

    /// Starts the warehouse and polls until it reports RUNNING. Returns the
    /// warehouse and how long the wait took.
    #[tracing::instrument(skip(self, wait))]
    pub async fn start_warehouse_and_wait(
        &self,
        id: &str,
        wait: &WaitPolicy,
    ) -> Result<(Warehouse, Duration), WorkspaceError> {
        let started = Instant::now();
        self.start_warehouse(id).await?;

        loop {
            let warehouse = self.get_warehouse(id).await?;
            match warehouse.state {
                Some(WarehouseState::Running) => {
                    let elapsed = started.elapsed();
                    tracing::info!(
                        warehouse_id = id,
                        startup_s = elapsed.as_secs(),
                        "warehouse is running"
                    );
                    return Ok((warehouse, elapsed));
                }
                Some(state) if state.is_failure() => {
                    let message = warehouse
                        .health
                        .and_then(|h| h.summary)
                        .unwrap_or_else(|| "no health summary".to_string());
                    return WarehouseFailedSnafu {
                        warehouse_id: id,
                        state: state.to_string(),
                        message,
                    }
                    .fail();
                }
                state => {
                    tracing::debug!(warehouse_id = id, state = ?state, "waiting for warehouse");
                }
            }

            if started.elapsed() + wait.poll_interval > wait.timeout {
                return WaitDeadlineSnafu {
                    what: format!("warehouse {id} to reach RUNNING"),
                    timeout: wait.timeout,
                }
                .fail();
            }
            tokio::time::sleep(wait.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_unknown_state() {
        let warehouse: Warehouse =
            serde_json::from_str(r#"{"id":"a","name":"b","state":"HIBERNATING"}"#).unwrap();

        assert_eq!(warehouse.state, Some(WarehouseState::Unknown));
    }

    #[test]
    fn should_display_state_like_the_api() {
        assert_eq!(WarehouseState::Running.to_string(), "RUNNING");
        assert!(WarehouseState::Deleted.is_failure());
        assert!(!WarehouseState::Starting.is_failure());
    }
}
