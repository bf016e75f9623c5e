/// Failures from the upstream trace subscription.
///
/// `Connect` and `Subscribe` abort a start attempt and leave the session idle
/// for retry; `Stop` is logged and swallowed so a failed teardown can never
/// wedge the session in an active state.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SourceError {
    #[error("broker unreachable: {0}")]
    Connect(String),
    #[error("trace subscription failed: {0}")]
    Subscribe(String),
    #[error("subscription teardown failed: {0}")]
    Stop(String),
}

impl SourceError {
    /// True when the error belongs to a start attempt rather than a teardown.
    pub fn aborts_start(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Subscribe(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect_failed",
            Self::Subscribe(_) => "subscribe_failed",
            Self::Stop(_) => "stop_failed",
        }
    }
}

/// A single malformed trace record.
///
/// Contained at the source: the record is rejected without requeue and
/// monitoring continues. Never surfaced to viewers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("trace routing key has no action segment")]
    MissingAction,
    #[error("unknown trace action: {0}")]
    UnknownAction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_errors_classified() {
        assert!(SourceError::Connect("refused".into()).aborts_start());
        assert!(SourceError::Subscribe("no channel".into()).aborts_start());
        assert!(!SourceError::Stop("already closed".into()).aborts_start());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(SourceError::Connect("x".into()).error_kind(), "connect_failed");
        assert_eq!(SourceError::Subscribe("x".into()).error_kind(), "subscribe_failed");
        assert_eq!(SourceError::Stop("x".into()).error_kind(), "stop_failed");
    }

    #[test]
    fn display_includes_cause() {
        let err = SourceError::Connect("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn normalize_error_display() {
        assert_eq!(
            NormalizeError::UnknownAction("route".into()).to_string(),
            "unknown trace action: route"
        );
    }
}
