use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Invalid override '{pair}': expected KEY=VALUE")]
    InvalidOverride { pair: String },

    #[error("{failed} scene(s) failed and none succeeded")]
    NothingGrabbed { failed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Grab(#[from] satgrab::Error),
}
