//! Error types for butterfly-access
//!
//! Geometry and configuration problems are detected before any tile work
//! starts. Routing failures and malformed routing responses abort the whole
//! run; they are kept as separate variants so callers can tell a flaky engine
//! from a broken one.

use thiserror::Error;

/// Main error type for accessibility computations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or degenerate region geometry
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Malformed input data (settlements, facilities, coordinates)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport, timeout or process failure talking to the routing engine
    #[error("Routing engine error: {0}")]
    RoutingEngine(String),

    /// Routing engine answered with a malformed or mismatched response
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// A tile aborted the run
    #[error("Tile {index} failed: {source}")]
    TileFailed {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Strip any `TileFailed` wrapping and return the underlying error
    pub fn root(&self) -> &Error {
        match self {
            Error::TileFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for transport/process failures of the routing engine
    pub fn is_routing_failure(&self) -> bool {
        matches!(self.root(), Error::RoutingEngine(_))
    }

    /// True when the routing engine returned a malformed response
    pub fn is_data_integrity(&self) -> bool {
        matches!(self.root(), Error::DataIntegrity(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::DataIntegrity(err.to_string())
        } else {
            Error::RoutingEngine(err.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience result type for butterfly-access operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_nested_tile_failures() {
        let err = Error::TileFailed {
            index: 3,
            source: Box::new(Error::DataIntegrity("2 rows for 3 sources".to_string())),
        };
        assert!(err.is_data_integrity());
        assert!(!err.is_routing_failure());
        assert!(matches!(err.root(), Error::DataIntegrity(_)));
    }

    #[test]
    fn test_display_includes_tile_index() {
        let err = Error::TileFailed {
            index: 7,
            source: Box::new(Error::RoutingEngine("connection refused".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("Tile 7"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_routing_failure());
    }
}
