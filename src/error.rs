use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error reading/writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize {file}: {source}")]
    Serde {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} not found")]
    NotFound(String),
}

/// Errors surfaced by the model-size oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transport error querying model size for {model}: {source}")]
    Transport {
        model: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("oracle returned unexpected status {status} for {model}")]
    Status { model: String, status: u16 },
    #[error("could not parse oracle response for {model}: {source}")]
    Parse {
        model: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Result of a kudos-affecting operation that can be rejected without being exceptional.
///
/// Mirrors the upstream convention of returning `(amount, message)` pairs instead of
/// raising: a rejected transfer is not a programming error, just a `0` with a reason.
#[derive(Debug, Clone, PartialEq)]
pub struct KudosOutcome {
    pub amount: f64,
    pub message: &'static str,
}

impl KudosOutcome {
    pub fn ok(amount: f64) -> Self {
        Self {
            amount,
            message: "OK",
        }
    }

    pub fn rejected(message: &'static str) -> Self {
        Self {
            amount: 0.0,
            message,
        }
    }
}
