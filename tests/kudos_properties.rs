use std::sync::Arc;

use chrono::{DateTime, Utc};
use horde_scheduler::horde::{Horde, HordeState};
use horde_scheduler::model::user::KudosAction;
use horde_scheduler::oracle::StubOracle;
use proptest::prelude::*;

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
}

async fn transfer_case(starting: f64, amount: f64) -> (f64, f64) {
    let horde = Horde::new(HordeState::new(now()), Arc::new(StubOracle::default()), Default::default());
    horde.create_user("a", "alice", "key-a", now()).await;
    let bob = horde.create_user("b", "bob", "key-b", now()).await;
    {
        let mut state = horde.lock().await;
        state.users.get_mut("a").unwrap().modify_kudos(starting, KudosAction::Accumulated);
    }

    let outcome = horde.transfer_kudos_to_username("a", &bob.alias(), amount).await;

    let state = horde.lock().await;
    let a_kudos = state.users.get("a").unwrap().kudos;
    let b_kudos = state.users.get("b").unwrap().kudos;
    let _ = outcome;
    (a_kudos, b_kudos)
}

proptest! {
    /// Total kudos across the two parties is conserved whether or not the
    /// transfer is accepted: a rejected transfer moves nothing, an accepted
    /// one moves exactly `amount` from src to dst.
    #[test]
    fn transfer_conserves_total_kudos(starting in 0.0f64..1000.0, amount in 0.0f64..1500.0) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (a_kudos, b_kudos) = rt.block_on(transfer_case(starting, amount));
        prop_assert!((a_kudos + b_kudos - starting).abs() < 1e-6);
        prop_assert!(a_kudos >= -1e-6);
    }
}
