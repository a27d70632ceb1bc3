use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiscopeError {
    #[error("Malformed run record: {0}")]
    IngestionData(String),

    #[error("Run store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Analysis pass for '{repo}' exceeded {secs}s")]
    AnalysisTimeout { repo: String, secs: u64 },

    #[error("No flaky record for test '{0}'")]
    UnknownTest(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CiscopeError>;
