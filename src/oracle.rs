use async_trait::async_trait;
use serde::Deserialize;

use crate::error::OracleError;

/// Stands in for the out-of-scope model-parameter-count lookup: given a model
/// identifier, returns its size so the kudos formula can weigh larger models
/// more heavily. The core only depends on this numeric contract, not on how
/// it's produced.
#[async_trait]
pub trait ModelSizeOracle: Send + Sync {
    async fn parameters_in_billions(&self, model: &str) -> Result<f64, OracleError>;
}

/// Always returns a fixed multiplier. Used when no oracle URL is configured, and in tests.
pub struct StubOracle {
    multiplier: f64,
}

impl StubOracle {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }
}

impl Default for StubOracle {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl ModelSizeOracle for StubOracle {
    async fn parameters_in_billions(&self, _model: &str) -> Result<f64, OracleError> {
        Ok(self.multiplier)
    }
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    parameters_billions: f64,
}

/// Queries a configured HTTP endpoint for a model's parameter count.
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracle {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build oracle HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ModelSizeOracle for HttpOracle {
    async fn parameters_in_billions(&self, model: &str) -> Result<f64, OracleError> {
        let url = format!("{}/{model}", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| OracleError::Transport {
                model: model.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(OracleError::Status {
                model: model.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body: OracleResponse = resp
            .json()
            .await
            .map_err(|source| OracleError::Parse {
                model: model.to_string(),
                source,
            })?;
        Ok(body.parameters_billions)
    }
}
