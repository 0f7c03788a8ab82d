use std::collections::HashMap;

use crate::config::{ConfigError, InvalidParameterValueSnafu, MissingParameterSnafu};
use snafu::OptionExt;

/// A single externally supplied parameter value.
///
/// Job parameters and CLI flags always arrive as strings; typed accessors on
/// [`Settings`] coerce them on read.
#[derive(Clone, Debug, PartialEq)]
pub enum Setting {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl Setting {
    fn as_string(&self) -> Option<String> {
        match self {
            Setting::String(value) => Some(value.clone()),
            Setting::Int(value) => Some(value.to_string()),
            Setting::Double(value) => Some(value.to_string()),
            Setting::Bool(value) => Some(value.to_string()),
        }
    }

    fn as_int(&self) -> Option<Result<i64, String>> {
        match self {
            Setting::Int(value) => Some(Ok(*value)),
            Setting::String(value) => Some(value.trim().parse::<i64>().map_err(|_| value.clone())),
            Setting::Double(value) => Some(Err(value.to_string())),
            Setting::Bool(value) => Some(Err(value.to_string())),
        }
    }

    fn as_bool(&self) -> Option<Result<bool, String>> {
        match self {
            Setting::Bool(value) => Some(Ok(*value)),
            Setting::String(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Ok(true)),
                "false" | "0" | "no" => Some(Ok(false)),
                _ => Some(Err(value.clone())),
            },
            Setting::Int(value) => Some(Err(value.to_string())),
            Setting::Double(value) => Some(Err(value.to_string())),
        }
    }
}

pub trait Settings {
    fn get(&self, key: &str) -> Option<Setting>;

    fn set(&mut self, key: &str, value: Setting);

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)?.as_string()
    }

    /// Reads an integer, accepting strings that parse as one.
    fn get_int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(key).and_then(|setting| setting.as_int()) {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(value)) => InvalidParameterValueSnafu {
                parameter: key,
                value,
                explanation: "expected an integer",
            }
            .fail(),
        }
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key).and_then(|setting| setting.as_bool()) {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(value)) => InvalidParameterValueSnafu {
                parameter: key,
                value,
                explanation: "expected a boolean",
            }
            .fail(),
        }
    }

    fn require_string(&self, key: &str) -> Result<String, ConfigError> {
        self.get_string(key)
            .context(MissingParameterSnafu { parameter: key })
    }

    fn require_int(&self, key: &str) -> Result<i64, ConfigError> {
        self.get_int(key)?
            .context(MissingParameterSnafu { parameter: key })
    }

    fn set_string(&mut self, key: &str, value: String) {
        self.set(key, Setting::String(value));
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, Setting::Int(value));
    }
}

impl Settings for HashMap<String, Setting> {
    fn get(&self, key: &str) -> Option<Setting> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: Setting) {
        self.insert(key.to_string(), value);
    }
}

/// Builds a settings bag from `key=value` pairs, the shape job parameters and
/// repeated `--param` flags take. Keys are normalized to lower snake case so
/// widget labels like `Query Repetition Count` resolve to
/// `query_repetition_count`.
pub fn settings_from_pairs<I, K, V>(pairs: I) -> HashMap<String, Setting>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (normalize_key(key.as_ref()), Setting::String(value.into())))
        .collect()
}

/// Parses a single `key=value` argument.
pub fn parse_pair(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => InvalidParameterValueSnafu {
            parameter: "param",
            value: raw,
            explanation: "expected KEY=VALUE",
        }
        .fail(),
    }
}

pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '-'], "_")
}
