use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{KILOTOKENS_WINDOW_SECS, KUDOS_TOKEN_DIVISOR, MAX_STATS_PERFORMANCES};
use crate::model::round2;
use crate::oracle::ModelSizeOracle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FulfilmentRecord {
    pub tokens: i64,
    #[serde(with = "crate::timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "crate::timestamp")]
    pub deliver_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Stats {
    #[serde(default)]
    pub server_performances: Vec<f64>,
    /// On-disk spelling is preserved verbatim for compatibility with existing snapshots.
    #[serde(rename = "model_mulitpliers", default)]
    pub model_multipliers: HashMap<String, f64>,
    /// Accepts the legacy key name if present, falling back to the current one.
    #[serde(default, alias = "fulfilment_times")]
    pub fulfillments: Vec<FulfilmentRecord>,
    #[serde(with = "crate::timestamp", default = "Utc::now")]
    pub last_pruning: DateTime<Utc>,
}

impl Stats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            server_performances: Vec::new(),
            model_multipliers: HashMap::new(),
            fulfillments: Vec::new(),
            last_pruning: now,
        }
    }

    /// Records a delivered generation's throughput, trims the performance
    /// window to its last `MAX_STATS_PERFORMANCES` samples, and returns tokens/sec.
    pub fn record_fulfilment(&mut self, tokens: i64, start_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let secs = (now - start_time).num_seconds();
        let tokens_per_sec = if secs <= 0 {
            1.0
        } else {
            (tokens as f64 / secs as f64 * 10.0).round() / 10.0
        };

        self.server_performances.push(tokens_per_sec);
        while self.server_performances.len() > MAX_STATS_PERFORMANCES {
            self.server_performances.remove(0);
        }

        self.fulfillments.push(FulfilmentRecord {
            tokens,
            start_time,
            deliver_time: now,
        });

        tokens_per_sec
    }

    pub fn request_avg(&self) -> f64 {
        if self.server_performances.is_empty() {
            return 0.0;
        }
        self.server_performances.iter().sum::<f64>() / self.server_performances.len() as f64
    }

    /// Sums tokens delivered within the last minute; every `interval_secs`
    /// this also prunes `fulfillments` down to that same window.
    pub fn kilotokens_per_min(&mut self, now: DateTime<Utc>, interval_secs: i64) -> f64 {
        let window_start = now - chrono::Duration::seconds(KILOTOKENS_WINDOW_SECS);
        let total: i64 = self
            .fulfillments
            .iter()
            .filter(|f| f.deliver_time >= window_start)
            .map(|f| f.tokens)
            .sum();

        if (now - self.last_pruning).num_seconds() >= interval_secs {
            self.fulfillments.retain(|f| f.deliver_time >= window_start);
            self.last_pruning = now;
        }

        total as f64 / 1000.0
    }

    /// Cache-hit short-circuits. On miss, the caller is expected to have
    /// already released the scheduler lock before awaiting; any oracle
    /// failure is logged and defaults to a multiplier of 1, which is cached
    /// the same as a genuine success so repeated lookups don't retry forever.
    pub async fn model_multiplier(&mut self, model: &str, oracle: &dyn ModelSizeOracle) -> f64 {
        if let Some(cached) = self.model_multipliers.get(model) {
            return *cached;
        }

        let multiplier = match oracle.parameters_in_billions(model).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(model, error = %err, "Model-size oracle lookup failed, defaulting to 1");
                1.0
            }
        };

        self.model_multipliers.insert(model.to_string(), multiplier);
        multiplier
    }

    pub fn convert_tokens_to_kudos(tokens: i64, multiplier: f64) -> f64 {
        round2(tokens as f64 * multiplier / KUDOS_TOKEN_DIVISOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::StubOracle;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn record_fulfilment_trims_to_window() {
        let mut stats = Stats::new(now());
        for i in 0..15 {
            stats.record_fulfilment(100, now() - chrono::Duration::seconds(10), now() + chrono::Duration::seconds(i));
        }
        assert_eq!(stats.server_performances.len(), MAX_STATS_PERFORMANCES);
    }

    #[test]
    fn request_avg_zero_when_empty() {
        let stats = Stats::new(now());
        assert_eq!(stats.request_avg(), 0.0);
    }

    #[test]
    fn kilotokens_per_min_sums_recent_window() {
        let mut stats = Stats::new(now());
        stats.fulfillments.push(FulfilmentRecord {
            tokens: 5000,
            start_time: now(),
            deliver_time: now(),
        });
        stats.fulfillments.push(FulfilmentRecord {
            tokens: 1000,
            start_time: now() - chrono::Duration::seconds(120),
            deliver_time: now() - chrono::Duration::seconds(120),
        });
        let kt = stats.kilotokens_per_min(now(), 60);
        assert_eq!(kt, 5.0);
    }

    #[tokio::test]
    async fn model_multiplier_caches_after_first_lookup() {
        let mut stats = Stats::new(now());
        let oracle = StubOracle::new(13.0);
        let first = stats.model_multiplier("llama", &oracle).await;
        assert_eq!(first, 13.0);
        assert_eq!(stats.model_multipliers.get("llama"), Some(&13.0));
    }

    #[test]
    fn convert_tokens_to_kudos_applies_formula() {
        assert_eq!(Stats::convert_tokens_to_kudos(210, 1.0), 10.0);
    }

    #[test]
    fn deserializes_legacy_field_names() {
        let json = serde_json::json!({
            "server_performances": [],
            "model_mulitpliers": {"m": 2.0},
            "fulfilment_times": [],
            "last_pruning": "2026-01-01 00:00:00",
        });
        let stats: Stats = serde_json::from_value(json).unwrap();
        assert_eq!(stats.model_multipliers.get("m"), Some(&2.0));
    }
}
