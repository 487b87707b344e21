use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_WORKER_PERFORMANCES;
use crate::model::prompt::WaitingPrompt;
use crate::model::round2;
use crate::model::user::KudosAction;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkerKudosDetails {
    #[serde(default)]
    pub generated: f64,
    #[serde(default)]
    pub uptime: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    /// `oauth_id` of the owning user; resolved through the user index, never owned directly.
    pub owner: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub max_length: i64,
    #[serde(default)]
    pub max_content_length: i64,
    #[serde(default)]
    pub softprompts: Vec<String>,
    #[serde(default)]
    pub contributions: i64,
    #[serde(default)]
    pub fulfilments: i64,
    #[serde(default)]
    pub kudos: f64,
    #[serde(default)]
    pub kudos_details: WorkerKudosDetails,
    #[serde(default)]
    pub performances: Vec<f64>,
    #[serde(default)]
    pub uptime: i64,
    #[serde(with = "crate::timestamp::option", default)]
    pub last_check_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reward_uptime: i64,
}

impl Worker {
    pub fn create(id: Uuid, name: impl Into<String>, owner_oauth_id: impl Into<String>, softprompts: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: owner_oauth_id.into(),
            model: String::new(),
            max_length: 0,
            max_content_length: 0,
            softprompts,
            contributions: 0,
            fulfilments: 0,
            kudos: 0.0,
            kudos_details: WorkerKudosDetails::default(),
            performances: Vec::new(),
            uptime: 0,
            last_check_in: None,
            last_reward_uptime: 0,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after_secs: i64) -> bool {
        match self.last_check_in {
            None => true,
            Some(last) => (now - last).num_seconds() > stale_after_secs,
        }
    }

    /// Returns the uptime-kudos award credited this check-in, if any, so the
    /// caller can also credit the owning `User` (the worker doesn't hold a
    /// `&mut User` — ownership is resolved by the orchestrator through the user index).
    pub fn check_in(
        &mut self,
        now: DateTime<Utc>,
        model: impl Into<String>,
        max_length: i64,
        max_content_length: i64,
        softprompts: Vec<String>,
        stale_after_secs: i64,
        uptime_reward_threshold_secs: i64,
        model_multiplier: f64,
        uptime_kudos_divisor: f64,
    ) -> Option<f64> {
        let was_stale = self.is_stale(now, stale_after_secs);
        let mut awarded = None;

        if !was_stale {
            if let Some(last) = self.last_check_in {
                self.uptime += (now - last).num_seconds().max(0);
            }
            if self.uptime - self.last_reward_uptime > uptime_reward_threshold_secs {
                let kudos_award = round2(model_multiplier / uptime_kudos_divisor);
                self.modify_kudos(kudos_award, WorkerKudosAction::Uptime);
                self.last_reward_uptime = self.uptime;
                awarded = Some(kudos_award);
            }
        } else {
            self.last_reward_uptime = self.uptime;
        }

        self.last_check_in = Some(now);
        self.model = model.into();
        self.max_length = max_length;
        self.max_content_length = max_content_length;
        self.softprompts = softprompts;

        awarded
    }

    pub fn modify_kudos(&mut self, delta: f64, action: WorkerKudosAction) {
        self.kudos = round2(self.kudos + delta);
        let bucket = match action {
            WorkerKudosAction::Generated => &mut self.kudos_details.generated,
            WorkerKudosAction::Uptime => &mut self.kudos_details.uptime,
        };
        *bucket = round2(*bucket + delta);
    }

    pub fn record_contribution(&mut self, tokens: i64, kudos: f64, tokens_per_sec: f64) {
        self.modify_kudos(kudos, WorkerKudosAction::Generated);
        self.contributions += tokens;
        self.fulfilments += 1;
        self.performances.push(tokens_per_sec);
        while self.performances.len() > MAX_WORKER_PERFORMANCES {
            self.performances.remove(0);
        }
    }

    pub fn performance_average(&self) -> f64 {
        if self.performances.is_empty() {
            return 1.0;
        }
        self.performances.iter().sum::<f64>() / self.performances.len() as f64
    }

    /// Evaluates every eligibility check without short-circuiting, so the
    /// *last* failing check's reason wins — matching the observed upstream behavior.
    pub fn can_generate(&self, wp: &WaitingPrompt) -> (bool, Option<&'static str>) {
        let mut ok = true;
        let mut reason: Option<&'static str> = None;

        if !wp.servers.is_empty() && !wp.servers.iter().any(|s| s == &self.id.to_string()) {
            ok = false;
            reason = Some("server_id");
        }
        if !wp.models.is_empty() && !wp.models.iter().any(|m| m == &self.model) {
            ok = false;
            reason = Some("models");
        }
        if self.max_content_length < wp.max_content_length {
            ok = false;
            reason = Some("max_content_length");
        }
        if self.max_length < wp.max_length {
            ok = false;
            reason = Some("max_length");
        }
        if !self.matches_softprompt(&wp.softprompts) {
            ok = false;
            reason = Some("matching_softprompt");
        }

        (ok, reason)
    }

    fn matches_softprompt(&self, requested: &[String]) -> bool {
        if requested.is_empty() {
            return true;
        }
        requested.iter().any(|req| {
            req.is_empty() || self.softprompts.iter().any(|have| have.contains(req.as_str()))
        })
    }

    /// Human-readable uptime, e.g. `"3 hours"`. Not required by any invariant;
    /// kept for callers (operator tooling) that want it.
    pub fn uptime_human(&self) -> String {
        let secs = self.uptime;
        if secs < 60 {
            format!("{secs} seconds")
        } else if secs < 3600 {
            format!("{} minutes", secs / 60)
        } else if secs < 86400 {
            format!("{} hours", secs / 3600)
        } else {
            format!("{} days", secs / 86400)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum WorkerKudosAction {
    Generated,
    Uptime,
}

// Kept so callers that only have a `User` to hand can credit accumulated kudos the same way.
pub fn credit_uptime_to_user(user: &mut crate::model::User, kudos: f64) {
    user.modify_kudos(kudos, KudosAction::Accumulated);
}
