use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::index::Index;

/// One in-flight generation bound to a single worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingGeneration {
    pub id: Uuid,
    /// id of the owning `WaitingPrompt`; resolved through the prompt index.
    pub owner: Uuid,
    /// name of the assigned `Worker`; resolved through the worker index.
    pub worker: String,
    /// snapshot of `worker.model` taken at issue time.
    pub model: String,
    pub generation: Option<String>,
    #[serde(default)]
    pub kudos: f64,
    pub start_time: DateTime<Utc>,
}

impl ProcessingGeneration {
    pub fn new(id: Uuid, owner: Uuid, worker_name: impl Into<String>, model: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            worker: worker_name.into(),
            model: model.into(),
            generation: None,
            kudos: 0.0,
            start_time,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.generation.is_some()
    }

    /// Idempotent: a second call returns `false` and leaves `kudos`/`generation` untouched.
    pub fn set_generation(&mut self, text: impl Into<String>, kudos: f64) -> bool {
        if self.is_completed() {
            return false;
        }
        self.generation = Some(text.into());
        self.kudos = kudos;
        true
    }

    pub fn expected_time_left(&self, max_length: i64, performance_average: f64, now: DateTime<Utc>) -> f64 {
        if self.is_completed() {
            return 0.0;
        }
        let elapsed = (now - self.start_time).num_seconds() as f64;
        let remaining = max_length as f64 / performance_average.max(f64::MIN_POSITIVE) - elapsed;
        remaining.max(0.0)
    }
}

/// A user-submitted batch request of `n` generations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingPrompt {
    pub id: Uuid,
    /// `oauth_id` of the owning user; resolved through the user index.
    pub owner: String,
    pub prompt: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub softprompts: Vec<String>,
    pub max_length: i64,
    pub max_content_length: i64,
    /// additional generation parameters passed through verbatim to workers.
    #[serde(default)]
    pub params: Value,
    pub n: i64,
    #[serde(default)]
    pub processing_gens: Vec<Uuid>,
    pub last_process_time: DateTime<Utc>,
    /// Monotonic submission order, used only to break ties in the kudos-sorted
    /// queue (HashMap iteration order is not insertion order).
    #[serde(default)]
    pub sequence: i64,
}

/// Envelope handed back to the RPC layer when a generation is dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEnvelope {
    pub payload: Value,
    pub softprompt: String,
    pub id: Uuid,
}

impl WaitingPrompt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        owner: impl Into<String>,
        prompt: impl Into<String>,
        models: Vec<String>,
        servers: Vec<String>,
        softprompts: Vec<String>,
        max_length: i64,
        max_content_length: i64,
        params: Value,
        requested_n: i64,
        now: DateTime<Utc>,
        max_gens_per_wp: i64,
        sequence: i64,
    ) -> Self {
        let n = if requested_n > max_gens_per_wp {
            tracing::warn!(requested_n, clamp = max_gens_per_wp, "Clamping n to the maximum allowed");
            max_gens_per_wp
        } else {
            requested_n.max(0)
        };

        Self {
            id,
            owner: owner.into(),
            prompt: prompt.into(),
            models,
            servers,
            softprompts,
            max_length,
            max_content_length,
            params,
            n,
            processing_gens: Vec::new(),
            last_process_time: now,
            sequence,
        }
    }

    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.last_process_time = now;
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after_secs: i64) -> bool {
        (now - self.last_process_time).num_seconds() > stale_after_secs
    }

    pub fn needs_gen(&self) -> bool {
        self.n > 0
    }

    /// `n == 0` AND every child generation is completed.
    pub fn is_completed(&self, generations: &Index<ProcessingGeneration>) -> bool {
        self.n == 0 && self.processing_gens.iter().all(|id| generations.get(id).is_some_and(|g| g.is_completed()))
    }

    /// `(finished, processing)` counts over this prompt's children.
    pub fn count_processing_gens(&self, generations: &Index<ProcessingGeneration>) -> (usize, usize) {
        self.processing_gens.iter().fold((0, 0), |(finished, processing), id| match generations.get(id) {
            Some(g) if g.is_completed() => (finished + 1, processing),
            Some(_) => (finished, processing + 1),
            None => (finished, processing),
        })
    }

    /// Builds the outgoing dispatch payload: `params` with `prompt` injected and `n` forced to 1.
    pub fn dispatch_payload(&self) -> Value {
        let mut payload = self.params.clone();
        if !payload.is_object() {
            payload = Value::Object(serde_json::Map::new());
        }
        let obj = payload.as_object_mut().expect("coerced to object above");
        obj.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        obj.insert("n".to_string(), Value::from(1));
        payload
    }

    /// Decrements `n`, records a new `ProcessingGeneration`, and returns the
    /// dispatch envelope. No-op (returns `None`) if `n <= 0`.
    pub fn start_generation(
        &mut self,
        worker_name: impl Into<String>,
        worker_model: impl Into<String>,
        matching_softprompt: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<(ProcessingGeneration, DispatchEnvelope)> {
        if self.n <= 0 {
            return None;
        }

        let gen_id = Uuid::new_v4();
        let gen = ProcessingGeneration::new(gen_id, self.id, worker_name, worker_model, now);
        self.processing_gens.push(gen_id);
        self.n -= 1;
        self.refresh(now);

        let envelope = DispatchEnvelope {
            payload: self.dispatch_payload(),
            softprompt: matching_softprompt.into(),
            id: gen_id,
        };

        Some((gen, envelope))
    }

    #[cfg(test)]
    pub fn new_for_test(
        max_length: i64,
        max_content_length: i64,
        models: Vec<String>,
        servers: Vec<String>,
        softprompts: Vec<String>,
    ) -> Self {
        Self::new(
            Uuid::new_v4(),
            "anon",
            "hi",
            models,
            servers,
            softprompts,
            max_length,
            max_content_length,
            Value::Null,
            1,
            Utc::now(),
            crate::constants::MAX_GENS_PER_WP,
            0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn n_is_clamped_to_twenty() {
        let wp = WaitingPrompt::new(Uuid::new_v4(), "anon", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 50, now(), 20, 0);
        assert_eq!(wp.n, 20);
    }

    #[test]
    fn dispatch_payload_injects_prompt_and_forces_n_one() {
        let wp = WaitingPrompt::new(
            Uuid::new_v4(),
            "anon",
            "tell me a story",
            vec![],
            vec![],
            vec![],
            80,
            1024,
            serde_json::json!({"temperature": 0.8, "n": 5}),
            2,
            now(),
            20,
            0,
        );
        let payload = wp.dispatch_payload();
        assert_eq!(payload["prompt"], "tell me a story");
        assert_eq!(payload["n"], 1);
        assert_eq!(payload["temperature"], 0.8);
    }

    #[test]
    fn start_generation_decrements_n_and_is_noop_at_zero() {
        let mut wp = WaitingPrompt::new(Uuid::new_v4(), "anon", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 1, now(), 20, 0);
        let result = wp.start_generation("worker-1", "M", "", now());
        assert!(result.is_some());
        assert_eq!(wp.n, 0);
        assert!(wp.start_generation("worker-1", "M", "", now()).is_none());
    }

    #[test]
    fn set_generation_is_idempotent() {
        let mut gen = ProcessingGeneration::new(Uuid::new_v4(), Uuid::new_v4(), "w1", "M", now());
        assert!(gen.set_generation("hello", 5.0));
        assert_eq!(gen.kudos, 5.0);
        assert!(!gen.set_generation("world", 9.0));
        assert_eq!(gen.generation.as_deref(), Some("hello"));
        assert_eq!(gen.kudos, 5.0);
    }

    #[test]
    fn is_completed_requires_n_zero_and_all_children_done() {
        let mut wp = WaitingPrompt::new(Uuid::new_v4(), "anon", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 2, now(), 20, 0);
        let mut gens: Index<ProcessingGeneration> = Index::new();

        let (gen1, _) = wp.start_generation("w1", "M", "", now()).unwrap();
        let (gen2, _) = wp.start_generation("w1", "M", "", now()).unwrap();
        let gen2_id = gen2.id;
        gens.insert(gen1.id, gen1);
        gens.insert(gen2.id, gen2);
        assert!(!wp.is_completed(&gens));
        assert_eq!(wp.count_processing_gens(&gens), (0, 2));

        gens.get_mut(&gen2_id).unwrap().set_generation("done", 1.0);
        assert!(!wp.is_completed(&gens));
        assert_eq!(wp.count_processing_gens(&gens), (1, 1));

        let first_id = wp.processing_gens[0];
        gens.get_mut(&first_id).unwrap().set_generation("done too", 1.0);
        assert!(wp.is_completed(&gens));
        assert_eq!(wp.count_processing_gens(&gens), (2, 0));
    }

    #[test]
    fn is_stale_after_threshold() {
        let wp = WaitingPrompt::new(Uuid::new_v4(), "anon", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 1, now(), 20, 0);
        assert!(!wp.is_stale(now() + chrono::Duration::seconds(599), 600));
        assert!(wp.is_stale(now() + chrono::Duration::seconds(601), 600));
    }
}
