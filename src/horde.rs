use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::constants::UPTIME_KUDOS_DIVISOR;
use crate::error::KudosOutcome;
use crate::index::Index;
use crate::model::prompt::DispatchEnvelope;
use crate::model::user::KudosAction;
use crate::model::{ProcessingGeneration, Stats, User, WaitingPrompt, Worker};
use crate::oracle::ModelSizeOracle;

/// All mutable shared state, behind one lock: users, workers, prompts,
/// generations, and throughput stats move together so callers never observe
/// a torn snapshot (e.g. a prompt whose finished/processing counts disagree).
pub struct HordeState {
    pub users: HashMap<String, User>,
    pub workers: HashMap<String, Worker>,
    pub prompts: Index<WaitingPrompt>,
    pub generations: Index<ProcessingGeneration>,
    pub stats: Stats,
    next_user_id: i64,
    next_prompt_seq: i64,
}

impl HordeState {
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut users = HashMap::new();
        let anon = User::new_anon(now);
        users.insert(anon.oauth_id.clone(), anon);

        Self {
            users,
            workers: HashMap::new(),
            prompts: Index::new(),
            generations: Index::new(),
            stats: Stats::new(now),
            next_user_id: 1,
            next_prompt_seq: 0,
        }
    }

    pub(crate) fn set_next_user_id(&mut self, next_user_id: i64) {
        self.next_user_id = next_user_id;
    }
}

/// Runtime-tunable scheduling parameters, sourced from `Config` rather than
/// the hardcoded defaults in `constants.rs` (those remain only as fallbacks).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub stale_prompt_secs: i64,
    pub stale_worker_secs: i64,
    pub uptime_reward_threshold_secs: i64,
    pub max_gens_per_wp: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_prompt_secs: crate::constants::STALE_PROMPT_SECS,
            stale_worker_secs: crate::constants::STALE_WORKER_SECS,
            uptime_reward_threshold_secs: crate::constants::UPTIME_REWARD_THRESHOLD_SECS,
            max_gens_per_wp: crate::constants::MAX_GENS_PER_WP,
        }
    }
}

/// The scheduler. Wraps `HordeState` behind a single `tokio::sync::Mutex`,
/// matching the "single logical serial section" concurrency requirement —
/// deliberately coarser-grained than a per-entity lock scheme.
pub struct Horde {
    state: Mutex<HordeState>,
    oracle: Arc<dyn ModelSizeOracle>,
    config: SchedulerConfig,
}

impl Horde {
    pub fn new(state: HordeState, oracle: Arc<dyn ModelSizeOracle>, config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(state),
            oracle,
            config,
        }
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, HordeState> {
        self.state.lock().await
    }

    // ---- Users -----------------------------------------------------------

    pub async fn create_user(&self, oauth_id: &str, username: &str, api_key: &str, now: DateTime<Utc>) -> User {
        let mut state = self.state.lock().await;
        let id = state.next_user_id;
        state.next_user_id += 1;
        let user = User::new(id, oauth_id, username, api_key, now);
        state.users.insert(oauth_id.to_string(), user.clone());
        user
    }

    /// Core transfer between two already-identified users: the only check is the balance.
    pub async fn transfer_kudos(&self, src_oauth_id: &str, dst_oauth_id: &str, amount: f64) -> KudosOutcome {
        let mut state = self.state.lock().await;
        let src_kudos = state.users.get(src_oauth_id).map(|u| u.kudos).unwrap_or(0.0);
        if amount > src_kudos {
            return KudosOutcome::rejected("Not enough kudos.");
        }

        if let Some(src) = state.users.get_mut(src_oauth_id) {
            src.modify_kudos(-amount, KudosAction::Gifted);
        }
        if let Some(dst) = state.users.get_mut(dst_oauth_id) {
            dst.modify_kudos(amount, KudosAction::Received);
        }
        KudosOutcome::ok(amount)
    }

    /// Resolves `dst_username` (the `username#id` alias) before delegating to `transfer_kudos`.
    pub async fn transfer_kudos_to_username(&self, src_oauth_id: &str, dst_username: &str, amount: f64) -> KudosOutcome {
        let dst_oauth_id = {
            let state = self.state.lock().await;
            state.users.values().find(|u| u.alias() == dst_username).map(|u| u.oauth_id.clone())
        };
        let Some(dst_oauth_id) = dst_oauth_id else {
            return KudosOutcome::rejected("Invalid target username.");
        };

        let dst_is_anon = {
            let state = self.state.lock().await;
            state.users.get(&dst_oauth_id).map(|u| u.is_anon()).unwrap_or(false)
        };
        if dst_is_anon {
            return KudosOutcome::rejected("Tried to burn kudos via sending to Anonymous. Assuming PEBKAC and aborting.");
        }
        if dst_oauth_id == src_oauth_id {
            return KudosOutcome::rejected("Cannot send kudos to yourself, ya monkey!");
        }

        self.transfer_kudos(src_oauth_id, &dst_oauth_id, amount).await
    }

    /// Resolves `src_api_key` before delegating to `transfer_kudos_to_username`.
    pub async fn transfer_kudos_from_apikey_to_username(&self, src_api_key: &str, dst_username: &str, amount: f64) -> KudosOutcome {
        let src = {
            let state = self.state.lock().await;
            state.users.values().find(|u| u.api_key == src_api_key).cloned()
        };
        let Some(src) = src else {
            return KudosOutcome::rejected("Invalid API Key.");
        };
        if src.is_anon() {
            return KudosOutcome::rejected("You cannot transfer Kudos from Anonymous, smart-ass.");
        }

        self.transfer_kudos_to_username(&src.oauth_id, dst_username, amount).await
    }

    pub async fn top_contributor(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .users
            .values()
            .filter(|u| !u.is_anon())
            .max_by_key(|u| u.contributions.tokens)
            .map(|u| u.alias())
    }

    pub async fn total_usage(&self) -> (i64, i64) {
        let state = self.state.lock().await;
        state
            .workers
            .values()
            .fold((0, 0), |(tokens, fulfils), w| (tokens + w.contributions, fulfils + w.fulfilments))
    }

    /// The Worker-side analogue of `top_contributor`: highest `contributions` (tokens generated).
    pub async fn top_worker(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.workers.values().max_by_key(|w| w.contributions).map(|w| w.name.clone())
    }

    // ---- Workers -----------------------------------------------------------

    pub async fn create_worker(&self, name: &str, owner_oauth_id: &str, softprompts: Vec<String>) -> Worker {
        let mut state = self.state.lock().await;
        let worker = Worker::create(Uuid::new_v4(), name, owner_oauth_id, softprompts);
        state.workers.insert(name.to_string(), worker.clone());
        worker
    }

    pub async fn check_in(
        &self,
        name: &str,
        model: &str,
        max_length: i64,
        max_content_length: i64,
        softprompts: Vec<String>,
        now: DateTime<Utc>,
    ) {
        // Take `stats` out of the locked state so `model_multiplier`'s oracle
        // await doesn't hold the scheduler lock; put it back once it resolves.
        let mut state = self.state.lock().await;
        let mut stats = std::mem::take(&mut state.stats);
        drop(state);

        let multiplier = stats.model_multiplier(model, &*self.oracle).await;

        let mut state = self.state.lock().await;
        state.stats = stats;

        let owner = state.workers.get(name).map(|w| w.owner.clone());
        if let Some(worker) = state.workers.get_mut(name) {
            let awarded = worker.check_in(
                now,
                model,
                max_length,
                max_content_length,
                softprompts,
                self.config.stale_worker_secs,
                self.config.uptime_reward_threshold_secs,
                multiplier,
                UPTIME_KUDOS_DIVISOR,
            );
            if let (Some(kudos), Some(owner)) = (awarded, owner) {
                if let Some(user) = state.users.get_mut(&owner) {
                    user.record_uptime(kudos);
                }
            }
        }
    }

    pub async fn active_worker_count(&self, now: DateTime<Utc>) -> usize {
        let state = self.state.lock().await;
        state.workers.values().filter(|w| !w.is_stale(now, self.config.stale_worker_secs)).count()
    }

    pub async fn available_models(&self, now: DateTime<Utc>) -> Vec<String> {
        let state = self.state.lock().await;
        let mut models: Vec<String> = state
            .workers
            .values()
            .filter(|w| !w.is_stale(now, self.config.stale_worker_secs))
            .map(|w| w.model.clone())
            .filter(|m| !m.is_empty())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    // ---- Prompts & scheduling ---------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn submit_prompt(
        &self,
        owner_oauth_id: &str,
        prompt: &str,
        models: Vec<String>,
        servers: Vec<String>,
        softprompts: Vec<String>,
        max_length: i64,
        max_content_length: i64,
        params: Value,
        n: i64,
        now: DateTime<Utc>,
    ) -> Uuid {
        let mut state = self.state.lock().await;
        let id = Uuid::new_v4();
        let sequence = state.next_prompt_seq;
        state.next_prompt_seq += 1;
        let wp = WaitingPrompt::new(
            id,
            owner_oauth_id,
            prompt,
            models,
            servers,
            softprompts,
            max_length,
            max_content_length,
            params,
            n,
            now,
            self.config.max_gens_per_wp,
            sequence,
        );
        state.prompts.insert(id, wp);
        id
    }

    /// Walks the kudos-sorted queue and dispatches the first prompt the named
    /// worker is eligible for. Returns `None` if nothing matches.
    pub async fn try_dispatch(&self, worker_name: &str, now: DateTime<Utc>) -> Option<DispatchEnvelope> {
        let mut state = self.state.lock().await;
        let order = Self::kudos_sorted_ids(&state);

        let worker = state.workers.get(worker_name)?.clone();

        let mut chosen: Option<(Uuid, String)> = None;
        for id in &order {
            let Some(wp) = state.prompts.get(id) else { continue };
            if !wp.needs_gen() {
                continue;
            }
            let (eligible, _reason) = worker.can_generate(wp);
            if eligible {
                let softprompt = wp
                    .softprompts
                    .iter()
                    .find(|req| req.is_empty() || worker.softprompts.iter().any(|have| have.contains(req.as_str())))
                    .cloned()
                    .unwrap_or_default();
                chosen = Some((*id, softprompt));
                break;
            }
        }

        let (wp_id, softprompt) = chosen?;
        let wp = state.prompts.get_mut(&wp_id)?;
        let (gen, envelope) = wp.start_generation(worker_name, worker.model.clone(), softprompt, now)?;
        state.generations.insert(gen.id, gen);
        Some(envelope)
    }

    /// Delivers a completed generation's text. No-op on a second call for the
    /// same generation (idempotent delivery).
    pub async fn deliver_generation(&self, generation_id: &Uuid, text: &str, now: DateTime<Utc>) -> f64 {
        let mut state = self.state.lock().await;

        let Some(gen) = state.generations.get(generation_id) else {
            return 0.0;
        };
        if gen.is_completed() {
            return 0.0;
        }
        let (owner_wp_id, worker_name, model) = (gen.owner, gen.worker.clone(), gen.model.clone());

        let Some(wp) = state.prompts.get(&owner_wp_id) else {
            return 0.0;
        };
        let max_length = wp.max_length;
        let wp_owner = wp.owner.clone();

        let multiplier = *state.stats.model_multipliers.get(&model).unwrap_or(&1.0);
        let kudos = Stats::convert_tokens_to_kudos(max_length, multiplier);

        let tokens_per_sec = {
            let gen = state.generations.get(generation_id).expect("checked above");
            let start_time = gen.start_time;
            state.stats.record_fulfilment(max_length, start_time, now)
        };

        if let Some(gen) = state.generations.get_mut(generation_id) {
            gen.set_generation(text, kudos);
        }
        if let Some(worker) = state.workers.get_mut(&worker_name) {
            worker.record_contribution(max_length, kudos, tokens_per_sec);
        }
        if let Some(user) = state.users.get_mut(&wp_owner) {
            user.record_usage(max_length, kudos);
        }
        if let Some(wp) = state.prompts.get_mut(&owner_wp_id) {
            wp.refresh(now);
        }

        kudos
    }

    /// `wp.is_completed()`: `n == 0` and every child generation is completed.
    pub async fn is_wp_completed(&self, wp_id: &Uuid) -> bool {
        let state = self.state.lock().await;
        state.prompts.get(wp_id).is_some_and(|wp| wp.is_completed(&state.generations))
    }

    /// `(finished, processing)` counts over `wp`'s children, or `(0, 0)` if `wp` is unknown.
    pub async fn wp_gen_counts(&self, wp_id: &Uuid) -> (usize, usize) {
        let state = self.state.lock().await;
        state.prompts.get(wp_id).map(|wp| wp.count_processing_gens(&state.generations)).unwrap_or((0, 0))
    }

    /// Count of waiting prompts still needing generations for `owner_oauth_id`.
    pub async fn count_waiting_for_user(&self, owner_oauth_id: &str) -> usize {
        let state = self.state.lock().await;
        state.prompts.values().filter(|wp| wp.owner == owner_oauth_id && wp.needs_gen()).count()
    }

    /// `(total_n, total_queued_tokens)` summed across every prompt still needing generations.
    pub async fn count_totals(&self) -> (i64, i64) {
        let state = self.state.lock().await;
        state
            .prompts
            .values()
            .filter(|wp| wp.needs_gen())
            .fold((0, 0), |(n, tokens), wp| (n + wp.n, tokens + wp.max_length * wp.n))
    }

    /// `(position, queued_tokens, n_ahead)` for `wp`, or `(-1, 0, 0)` if it no longer needs generations.
    pub async fn queue_stats_for(&self, wp_id: &Uuid) -> (i64, i64, i64) {
        let state = self.state.lock().await;
        let Some(target) = state.prompts.get(wp_id) else {
            return (-1, 0, 0);
        };
        if !target.needs_gen() {
            return (-1, 0, 0);
        }

        let order = Self::kudos_sorted_ids(&state);
        let mut queued_tokens = 0i64;
        let mut n_ahead = 0i64;
        let mut position = 0i64;

        for id in &order {
            let Some(wp) = state.prompts.get(id) else { continue };
            if !wp.needs_gen() {
                continue;
            }
            if id == wp_id {
                return (position, queued_tokens, n_ahead);
            }
            queued_tokens += wp.max_length * wp.n;
            n_ahead += wp.n;
            position += 1;
        }

        (position, queued_tokens, n_ahead)
    }

    fn kudos_sorted_ids(state: &HordeState) -> Vec<Uuid> {
        let mut entries: Vec<(Uuid, f64, i64)> = state
            .prompts
            .iter()
            .map(|(id, wp)| {
                let kudos = state.users.get(&wp.owner).map(|u| u.kudos).unwrap_or(0.0);
                (*id, kudos, wp.sequence)
            })
            .collect();
        // sort by kudos descending; ties keep submission order via `sequence`
        // (HashMap iteration order is not insertion order, so this can't be a plain stable sort).
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.2.cmp(&b.2)));
        entries.into_iter().map(|(id, _, _)| id).collect()
    }

    // ---- Reaping ------------------------------------------------------------

    /// Deletes every prompt inactive past the configured stale threshold, cascading to its children.
    pub async fn reap_stale_prompts(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let stale: Vec<Uuid> = state
            .prompts
            .iter()
            .filter(|(_, wp)| wp.is_stale(now, self.config.stale_prompt_secs))
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(wp) = state.prompts.remove(id) {
                for gen_id in &wp.processing_gens {
                    state.generations.remove(gen_id);
                }
            }
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::StubOracle;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn new_horde() -> Horde {
        Horde::new(HordeState::new(now()), Arc::new(StubOracle::default()), SchedulerConfig::default())
    }

    #[tokio::test]
    async fn dispatch_and_delivery_completes_prompt() {
        let horde = new_horde();
        horde.create_worker("w1", "anon", vec!["foo-sp".into()]).await;
        horde.check_in("w1", "M", 80, 1024, vec!["foo-sp".into()], now()).await;

        let wp_id = horde
            .submit_prompt("anon", "hi", vec!["M".into()], vec![], vec!["foo".into()], 80, 1024, Value::Null, 2, now())
            .await;

        let env1 = horde.try_dispatch("w1", now()).await.expect("first dispatch");
        let env2 = horde.try_dispatch("w1", now()).await.expect("second dispatch");
        assert_ne!(env1.id, env2.id);

        assert!(!horde.is_wp_completed(&wp_id).await);
        horde.deliver_generation(&env1.id, "hello", now()).await;
        assert_eq!(horde.wp_gen_counts(&wp_id).await, (1, 1));
        horde.deliver_generation(&env2.id, "world", now()).await;

        assert!(horde.is_wp_completed(&wp_id).await);
        assert_eq!(horde.wp_gen_counts(&wp_id).await, (2, 0));

        let state = horde.lock().await;
        let wp = state.prompts.get(&wp_id).unwrap();
        assert_eq!(wp.n, 0);
        let worker = state.workers.get("w1").unwrap();
        assert_eq!(worker.fulfilments, 2);
        assert_eq!(worker.contributions, 160);
    }

    #[tokio::test]
    async fn ineligible_worker_is_skipped() {
        let horde = new_horde();
        horde.create_worker("w1", "anon", vec![]).await;
        horde.check_in("w1", "M", 40, 1024, vec![], now()).await;

        horde
            .submit_prompt("anon", "hi", vec!["M".into()], vec![], vec![], 80, 1024, Value::Null, 1, now())
            .await;

        assert!(horde.try_dispatch("w1", now()).await.is_none());
    }

    #[tokio::test]
    async fn kudos_priority_orders_queue() {
        let horde = new_horde();
        horde.create_user("a", "alice", "key-a", now()).await;
        horde.create_user("b", "bob", "key-b", now()).await;
        {
            let mut state = horde.lock().await;
            state.users.get_mut("a").unwrap().modify_kudos(100.0, KudosAction::Accumulated);
        }

        let wp_a = horde
            .submit_prompt("a", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 1, now())
            .await;
        let wp_b = horde
            .submit_prompt("b", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 1, now())
            .await;

        let (pos_a, _, _) = horde.queue_stats_for(&wp_a).await;
        let (pos_b, _, _) = horde.queue_stats_for(&wp_b).await;
        assert_eq!(pos_a, 0);
        assert_eq!(pos_b, 1);

        assert_eq!(horde.count_waiting_for_user("a").await, 1);
        assert_eq!(horde.count_waiting_for_user("nobody").await, 0);
        assert_eq!(horde.count_totals().await, (2, 160));
    }

    #[tokio::test]
    async fn top_worker_reports_highest_contributions() {
        let horde = new_horde();
        horde.create_worker("w1", "anon", vec![]).await;
        horde.check_in("w1", "M", 80, 1024, vec![], now()).await;
        horde.create_worker("w2", "anon", vec![]).await;
        horde.check_in("w2", "M", 80, 1024, vec![], now()).await;

        let wp_id = horde
            .submit_prompt("anon", "hi", vec!["M".into()], vec![], vec![], 80, 1024, Value::Null, 1, now())
            .await;
        let env = horde.try_dispatch("w1", now()).await.unwrap();
        horde.deliver_generation(&env.id, "hello", now()).await;
        let _ = wp_id;

        assert_eq!(horde.top_worker().await.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn reaper_removes_stale_prompt_and_children() {
        let horde = new_horde();
        let wp_id = horde
            .submit_prompt("anon", "hi", vec![], vec![], vec![], 80, 1024, Value::Null, 1, now())
            .await;
        horde.create_worker("w1", "anon", vec![]).await;
        horde.check_in("w1", "M", 80, 1024, vec![], now()).await;
        let env = horde.try_dispatch("w1", now()).await.unwrap();

        let later = now() + chrono::Duration::seconds(601);
        let reaped = horde.reap_stale_prompts(later).await;
        assert_eq!(reaped, 1);

        let state = horde.lock().await;
        assert!(state.prompts.get(&wp_id).is_none());
        assert!(state.generations.get(&env.id).is_none());
    }

    #[tokio::test]
    async fn transfer_kudos_rejects_self_transfer() {
        let horde = new_horde();
        let alice = horde.create_user("a", "alice", "key-a", now()).await;
        let outcome = horde.transfer_kudos_to_username("a", &alice.alias(), 5.0).await;
        assert_eq!(outcome.message, "Cannot send kudos to yourself, ya monkey!");
    }

    #[tokio::test]
    async fn transfer_kudos_moves_balance() {
        let horde = new_horde();
        horde.create_user("a", "alice", "key-a", now()).await;
        let bob = horde.create_user("b", "bob", "key-b", now()).await;
        {
            let mut state = horde.lock().await;
            state.users.get_mut("a").unwrap().modify_kudos(20.0, KudosAction::Accumulated);
        }
        let outcome = horde.transfer_kudos_to_username("a", &bob.alias(), 5.0).await;
        assert_eq!(outcome.message, "OK");
        let state = horde.lock().await;
        assert_eq!(state.users.get("a").unwrap().kudos, 15.0);
        assert_eq!(state.users.get("b").unwrap().kudos, 5.0);
    }

    #[tokio::test]
    async fn transfer_kudos_from_apikey_rejects_unknown_key() {
        let horde = new_horde();
        let bob = horde.create_user("b", "bob", "key-b", now()).await;
        let outcome = horde.transfer_kudos_from_apikey_to_username("no-such-key", &bob.alias(), 1.0).await;
        assert_eq!(outcome.message, "Invalid API Key.");
    }
}
