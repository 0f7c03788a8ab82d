#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Failed to initialize logging: {0}")]
    InitError(String),
}
