use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed chunk metadata, size mismatch, or an incomplete/expired session.
    /// The caller recovers by re-sending.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Every engine strategy failed or timed out.
    #[error("Engine load error: {0}")]
    EngineLoad(String),

    /// A single engine command failed. The demux ladder uses this to pick the next rung.
    #[error("Engine command error: {0}")]
    Engine(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("{stage} timed out after {}s (still running, gave up waiting)", .after.as_secs_f64())]
    Timeout { stage: String, after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl XsyncError {
    pub fn timeout<S: Into<String>>(stage: S, after: Duration) -> Self {
        XsyncError::Timeout {
            stage: stage.into(),
            after,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, XsyncError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, XsyncError>;

/// Race `future` against a timer, surfacing expiry as [`XsyncError::Timeout`].
///
/// The wrapped future is dropped on expiry; work it already handed off elsewhere
/// keeps running and its outcome is ignored.
pub async fn with_timeout<T, F>(stage: &str, after: Duration, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => Err(XsyncError::timeout(stage, after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_reports_stage() {
        let err = with_timeout("demux", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, XsyncError>(())
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("demux timed out"));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_errors() {
        let err = with_timeout("demux", Duration::from_secs(1), async {
            Err::<(), _>(XsyncError::Extraction("no streams".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, XsyncError::Extraction(_)));
    }
}
