use crate::config::retry::{RetryPolicy, WaitPolicy};
use crate::config::settings::Settings;
use crate::config::{ConfigError, InvalidParameterValueSnafu};
use strum::{Display, EnumString};
use url::Url;

/// Cloud provider hosting the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Cloud {
    Aws,
    Azure,
    Gcp,
}

impl Cloud {
    /// Infers the provider from the workspace hostname. Hosts that match none
    /// of the known domains yield `None`.
    pub fn detect(host: &str) -> Option<Self> {
        let host = Url::parse(host)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| host.to_string())
            .to_ascii_lowercase();

        const AZURE: &[&str] = &[
            ".azuredatabricks.net",
            ".databricks.azure.cn",
            ".databricks.azure.us",
        ];
        const GCP: &[&str] = &[".gcp.databricks.com"];
        const AWS: &[&str] = &[
            ".cloud.databricks.com",
            ".dev.databricks.com",
            ".cloud.databricks.us",
            ".cloud.databricks.mil",
        ];

        if AZURE.iter().any(|suffix| host.ends_with(suffix)) {
            Some(Cloud::Azure)
        } else if GCP.iter().any(|suffix| host.ends_with(suffix)) {
            Some(Cloud::Gcp)
        } else if AWS.iter().any(|suffix| host.ends_with(suffix)) {
            Some(Cloud::Aws)
        } else {
            None
        }
    }
}

/// Connection settings for one workspace.
#[derive(Clone, Debug)]
pub struct WorkspaceConfig {
    /// Base URL with scheme and without a trailing slash.
    pub host: String,
    pub token: String,
    /// Explicit provider; when unset it is inferred from `host`.
    pub cloud: Option<Cloud>,
    pub retry: RetryPolicy,
    pub wait: WaitPolicy,
}

impl WorkspaceConfig {
    pub fn new(host: &str, token: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: normalize_host(host)?,
            token: token.into(),
            cloud: None,
            retry: RetryPolicy::default(),
            wait: WaitPolicy::default(),
        })
    }

    pub fn from_settings(settings: &dyn Settings) -> Result<Self, ConfigError> {
        let host = settings.require_string("host")?;
        let token = settings.require_string("token")?;
        let mut config = Self::new(&host, token)?;

        if let Some(cloud) = settings.get_string("cloud").filter(|c| !c.is_empty()) {
            config.cloud = Some(cloud.parse::<Cloud>().map_err(|_| {
                InvalidParameterValueSnafu {
                    parameter: "cloud",
                    value: cloud.clone(),
                    explanation: "Allowed values are aws, azure and gcp",
                }
                .build()
            })?);
        }
        if let Some(seconds) = settings.get_int("warehouse_timeout_seconds")? {
            config.wait.timeout = std::time::Duration::from_secs(seconds.max(0) as u64);
        }
        Ok(config)
    }

    pub fn cloud(&self) -> Option<Cloud> {
        self.cloud.or_else(|| Cloud::detect(&self.host))
    }

    /// Hostname without scheme, as the SQL endpoint and job URLs expect it.
    pub fn hostname(&self) -> String {
        Url::parse(&self.host)
            .ok()
            .and_then(|url| {
                let host = url.host_str()?.to_string();
                Some(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            })
            .unwrap_or_else(|| self.host.clone())
    }
}

/// Adds `https://` when the scheme is missing and drops trailing slashes.
pub fn normalize_host(host: &str) -> Result<String, ConfigError> {
    let trimmed = host.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    match Url::parse(&with_scheme) {
        Ok(url) if url.host_str().is_some() => Ok(with_scheme),
        _ => InvalidParameterValueSnafu {
            parameter: "host",
            value: host,
            explanation: "not a valid workspace URL",
        }
        .fail(),
    }
}
