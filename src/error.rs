use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("failed to convert landmark index to landmark kind: {0}")]
    ConvertUSizeToLandmarkKind(usize),

    #[error("cannot start training before any landmark frame has arrived")]
    NoLandmarkData,

    #[error("cannot {0} a session that is not in progress")]
    NotInProgress(&'static str),

    #[error("cannot resume a session that is not paused")]
    NotPaused,

    #[error("pose {0} ({1}) cannot be skipped")]
    NotSkippable(usize, String),

    #[error("training module has no poses")]
    EmptyModule,

    #[error("unknown joint name: {0}")]
    UnknownJoint(String),

    #[error("failed to read {1:?}")]
    ReadFile(#[source] std::io::Error, PathBuf),

    #[error("failed to write {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),

    #[error("failed to parse reference poses")]
    ParseReferences(#[source] serde_json::Error),

    #[error("failed to serialize reference poses")]
    SerializeReferences(#[source] serde_json::Error),

    #[error("failed to parse training module")]
    ParseModule(#[source] serde_json::Error),

    #[error("failed to parse config file")]
    ParseConfig(#[source] toml::de::Error),

    #[error("failed to read landmark frame at line {1}")]
    ReadFrame(#[source] std::io::Error, usize),

    #[error("failed to parse landmark frame at line {1}")]
    ParseFrame(#[source] serde_json::Error, usize),

    #[error("landmark frame at line {0} has an invalid timestamp: {1} ms")]
    FrameTimestamp(usize, f64),

    #[error("landmark at line {0} has {1} coordinates, expected 3 or 4")]
    LandmarkArity(usize, usize),

    #[cfg(any(test, feature = "gemini"))]
    #[error("feedback service returned no text")]
    EmptyFeedback,

    #[error("feedback service is not configured: {0}")]
    FeedbackUnavailable(&'static str),

    #[cfg(feature = "gemini")]
    #[error("feedback request failed")]
    FeedbackRequest(#[source] reqwest::Error),

    #[cfg(any(test, feature = "gemini"))]
    #[error("failed to decode feedback response")]
    DecodeFeedback(#[source] serde_json::Error),
}
