//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying I/O, GDAL, HTTP and external-tool errors, and provides semantic
//! variants for configuration problems, provider failures and retrieval timeouts.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::GdalError),

    #[error("Raster toolchain error: {0}")]
    Toolchain(#[from] crate::io::ToolchainError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Footprint error: {0}")]
    Footprint(#[from] crate::geometry::FootprintError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No band map for product type '{product_type}' with asset type '{asset_type}'")]
    BandMap {
        product_type: String,
        asset_type: String,
    },

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("{provider} provider error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("Activation of {id} timed out after {secs}s")]
    ActivationTimeout { id: String, secs: u64 },

    #[error("Activation of {id} failed: {message}")]
    ActivationFailed { id: String, message: String },

    #[error("No catalog record found for id {id}")]
    NotFound { id: String },

    #[error("No assets could be retrieved for scene {ids:?}")]
    NoAssets { ids: Vec<String> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("External error: {0}")]
    External(String),
}

impl Error {
    pub fn external<E: std::fmt::Display>(e: E) -> Self {
        Error::External(e.to_string())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Failures scoped to a single catalog record. The pipeline logs them and
    /// carries on with the remaining records. `Json` only ever comes from
    /// decoding a provider payload; malformed specs surface as `Config`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Json(_)
                | Error::Provider { .. }
                | Error::ActivationTimeout { .. }
                | Error::ActivationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_not_transient() {
        let err = Error::BandMap {
            product_type: "PSScene".into(),
            asset_type: "visual".into(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("PSScene"));
        assert!(!Error::config("bad").is_transient());
    }

    #[test]
    fn timeouts_are_transient() {
        let err = Error::ActivationTimeout {
            id: "abc".into(),
            secs: 1800,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn undecodable_payloads_are_transient() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{\"status\":")
            .unwrap_err()
            .into();
        assert!(err.is_transient());
    }
}
