use crate::http::retry::HttpError;
use reqwest::StatusCode;
use snafu::{Location, Snafu};
use std::time::Duration;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum WorkspaceError {
    #[snafu(display("Request to {endpoint} failed"))]
    Http {
        endpoint: String,
        source: HttpError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{endpoint} responded with {status}: {error_code}: {message}"))]
    Api {
        endpoint: String,
        status: StatusCode,
        error_code: String,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to read response body from {endpoint}"))]
    ResponseText {
        endpoint: String,
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to parse response body from {endpoint}"))]
    ResponseFormat {
        endpoint: String,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Warehouse {warehouse_id} entered state {state} while waiting: {message}"))]
    WarehouseFailed {
        warehouse_id: String,
        state: String,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Timed out after {timeout:?} waiting for {what}"))]
    WaitDeadline {
        what: String,
        timeout: Duration,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Statement {statement_id} finished in state {state}: {message}"))]
    StatementFailed {
        statement_id: String,
        state: String,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{what} not found"))]
    NotFound {
        what: String,
        #[snafu(implicit)]
        location: Location,
    },
}
