use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ANON_API_KEY, ANON_MAX_CONCURRENT_WPS, ANON_OAUTH_ID, ANON_USER_ID, DEFAULT_MAX_CONCURRENT_WPS};
use crate::model::round2;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KudosDetails {
    #[serde(default)]
    pub accumulated: f64,
    #[serde(default)]
    pub gifted: f64,
    #[serde(default)]
    pub received: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContributionCounters {
    #[serde(default)]
    pub tokens: i64,
    #[serde(default)]
    pub fulfillments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UsageCounters {
    #[serde(default)]
    pub tokens: i64,
    #[serde(default)]
    pub requests: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub oauth_id: String,
    pub username: String,
    pub api_key: String,
    #[serde(default)]
    pub invite_id: String,
    #[serde(default)]
    pub kudos: f64,
    #[serde(default)]
    pub kudos_details: KudosDetails,
    #[serde(default)]
    pub contributions: ContributionCounters,
    #[serde(default)]
    pub usage: UsageCounters,
    #[serde(default = "default_max_concurrent_wps")]
    pub max_concurrent_wps: i64,
    #[serde(with = "crate::timestamp")]
    pub creation_date: DateTime<Utc>,
    #[serde(with = "crate::timestamp")]
    pub last_active: DateTime<Utc>,
}

fn default_max_concurrent_wps() -> i64 {
    DEFAULT_MAX_CONCURRENT_WPS
}

impl User {
    pub fn new(id: i64, oauth_id: impl Into<String>, username: impl Into<String>, api_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            oauth_id: oauth_id.into(),
            username: username.into(),
            api_key: api_key.into(),
            invite_id: String::new(),
            kudos: 0.0,
            kudos_details: KudosDetails::default(),
            contributions: ContributionCounters::default(),
            usage: UsageCounters::default(),
            max_concurrent_wps: DEFAULT_MAX_CONCURRENT_WPS,
            creation_date: now,
            last_active: now,
        }
    }

    pub fn new_anon(now: DateTime<Utc>) -> Self {
        let mut user = Self::new(ANON_USER_ID, ANON_OAUTH_ID, "Anonymous", ANON_API_KEY, now);
        user.max_concurrent_wps = ANON_MAX_CONCURRENT_WPS;
        user
    }

    pub fn is_anon(&self) -> bool {
        self.oauth_id == ANON_OAUTH_ID
    }

    /// Unique display alias, `username#id`.
    pub fn alias(&self) -> String {
        format!("{}#{}", self.username, self.id)
    }

    pub fn modify_kudos(&mut self, delta: f64, action: KudosAction) {
        self.kudos = round2(self.kudos + delta);
        let bucket = match action {
            KudosAction::Accumulated => &mut self.kudos_details.accumulated,
            KudosAction::Gifted => &mut self.kudos_details.gifted,
            KudosAction::Received => &mut self.kudos_details.received,
        };
        *bucket = round2(*bucket + delta);
    }

    pub fn record_usage(&mut self, tokens: i64, kudos: f64) {
        self.usage.tokens += tokens;
        self.usage.requests += 1;
        self.modify_kudos(-kudos, KudosAction::Accumulated);
    }

    pub fn record_contributions(&mut self, tokens: i64, kudos: f64) {
        self.contributions.tokens += tokens;
        self.contributions.fulfillments += 1;
        self.modify_kudos(kudos, KudosAction::Accumulated);
    }

    pub fn record_uptime(&mut self, kudos: f64) {
        self.modify_kudos(kudos, KudosAction::Accumulated);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum KudosAction {
    Accumulated,
    Gifted,
    Received,
}
