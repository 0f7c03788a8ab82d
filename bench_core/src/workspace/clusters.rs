use crate::workspace::{NotFoundSnafu, WorkspaceClient, WorkspaceError};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SparkVersion {
    pub key: String,
    pub name: String,
}

#[derive(Deserialize, Debug, Default)]
struct SparkVersionsResponse {
    #[serde(default)]
    versions: Vec<SparkVersion>,
}

/// Filter for picking a runtime out of the available spark versions.
#[derive(Clone, Debug)]
pub struct SparkVersionQuery {
    pub long_term_support: bool,
    pub latest: bool,
    pub scala: String,
    pub ml: bool,
    pub gpu: bool,
    pub photon: bool,
    pub graviton: bool,
    pub beta: bool,
}

impl Default for SparkVersionQuery {
    fn default() -> Self {
        Self {
            long_term_support: true,
            latest: true,
            scala: "2.12".to_string(),
            ml: false,
            gpu: false,
            photon: false,
            graviton: false,
            beta: false,
        }
    }
}

impl SparkVersionQuery {
    fn matches(&self, version: &SparkVersion) -> bool {
        let key = version.key.as_str();
        if !key.contains(&format!("-scala{}", self.scala)) || key.contains("apache-spark-") {
            return false;
        }
        let mut matches = key.contains("-ml-") == self.ml
            && !key.contains("-hls-")
            && key.contains("-gpu-") == self.gpu
            && key.contains("-photon-") == self.photon
            && key.contains("-aarch64-") == self.graviton
            && version.name.contains("Beta") == self.beta;
        if matches && self.long_term_support {
            matches = version.name.contains("LTS") || key.contains("-esr-");
        }
        matches
    }
}

/// Picks the runtime key matching `query`; with `latest` set the highest
/// `major.minor` wins.
pub fn select_spark_version(
    versions: &[SparkVersion],
    query: &SparkVersionQuery,
) -> Option<String> {
    let mut candidates: Vec<&SparkVersion> = versions.iter().filter(|v| query.matches(v)).collect();
    if candidates.len() > 1 && !query.latest {
        return None;
    }
    candidates.sort_by_key(|v| std::cmp::Reverse(version_rank(&v.key)));
    candidates.first().map(|v| v.key.clone())
}

/// `13.3.x-scala2.12` ranks as `(13, 3)`.
fn version_rank(key: &str) -> (u32, u32) {
    let mut parts = key.split(['.', '-']);
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

impl WorkspaceClient {
    pub async fn spark_versions(&self) -> Result<Vec<SparkVersion>, WorkspaceError> {
        let response: SparkVersionsResponse = self
            .get("/api/2.0/clusters/spark-versions", &[] as &[(&str, &str)])
            .await?;
        Ok(response.versions)
    }

    #[tracing::instrument(skip(self))]
    pub async fn select_spark_version(
        &self,
        query: &SparkVersionQuery,
    ) -> Result<String, WorkspaceError> {
        let versions = self.spark_versions().await?;
        let selected = select_spark_version(&versions, query).ok_or_else(|| {
            NotFoundSnafu {
                what: format!("Spark version matching {query:?}"),
            }
            .build()
        })?;
        tracing::debug!(selected = %selected, "selected spark version");
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(key: &str, name: &str) -> SparkVersion {
        SparkVersion {
            key: key.to_string(),
            name: name.to_string(),
        }
    }

    fn catalog() -> Vec<SparkVersion> {
        vec![
            version("12.2.x-scala2.12", "12.2 LTS (includes Apache Spark 3.3.2, Scala 2.12)"),
            version("13.3.x-scala2.12", "13.3 LTS (includes Apache Spark 3.4.1, Scala 2.12)"),
            version("9.1.x-scala2.12", "9.1 LTS (includes Apache Spark 3.1.2, Scala 2.12)"),
            version("14.0.x-scala2.12", "14.0 (includes Apache Spark 3.5.0, Scala 2.12)"),
            version("13.3.x-cpu-ml-scala2.12", "13.3 LTS ML (includes Apache Spark 3.4.1, Scala 2.12)"),
            version("13.3.x-gpu-ml-scala2.12", "13.3 LTS ML GPU"),
            version("15.0.x-photon-scala2.12", "15.0 LTS Photon"),
            version("16.0.x-scala2.13", "16.0 LTS (Scala 2.13)"),
            version("15.1.x-scala2.12", "15.1 Beta"),
        ]
    }

    #[test]
    fn should_select_latest_lts_runtime() {
        let selected = select_spark_version(&catalog(), &SparkVersionQuery::default());

        assert_eq!(selected.as_deref(), Some("13.3.x-scala2.12"));
    }

    #[test]
    fn should_select_latest_runtime_without_lts_filter() {
        let query = SparkVersionQuery {
            long_term_support: false,
            ..Default::default()
        };

        let selected = select_spark_version(&catalog(), &query);

        assert_eq!(selected.as_deref(), Some("14.0.x-scala2.12"));
    }

    #[test]
    fn should_return_none_without_matches() {
        assert_eq!(select_spark_version(&[], &SparkVersionQuery::default()), None);
    }
}
