use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The driver handle or host channel behind a surface is absent.
    #[error("Surface not ready: {0}")]
    NotReady(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Safety check rejected: {0}")]
    SafetyCheckRejected(String),

    #[error("Oracle transport failure: {0}")]
    OracleTransport(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unrecognized action: {0}")]
    UnrecognizedAction(String),

    #[error("Blocked URL: {0}")]
    BlockedUrl(String),

    /// The remote execution host answered with `success: false`.
    #[error("{0}")]
    ActionFailed(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short machine-readable name of the variant, used in transcripts and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotReady(_) => "not_ready",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Timeout(_) => "timeout",
            Error::ChannelClosed(_) => "channel_closed",
            Error::SafetyCheckRejected(_) => "safety_check_rejected",
            Error::OracleTransport(_) => "oracle_transport_failure",
            Error::UnknownTool(_) => "unknown_tool",
            Error::UnrecognizedAction(_) => "unrecognized_action",
            Error::BlockedUrl(_) => "blocked_url",
            Error::ActionFailed(_) => "action_failed",
            Error::Driver(_) => "driver",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
