//! Periodic refresh of every stored user
//!
//! Each cycle walks the auth-state store and hands every user to the
//! `Refreshable`. Updated states are persisted; users whose tokens can no
//! longer be renewed are left in place and logged, since a new login will
//! replace their state. A failure for one user never stops the cycle.
//! Each cycle starts from a fresh read of the store so states written by a
//! concurrent `--once` run are refreshed from their latest tokens.

use std::sync::Arc;
use std::time::Instant;

use authenticator::{Refreshable, RefreshUserResponse, refresh_user};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::store::AuthStateStore;

/// Result of refreshing one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Updated,
    Unchanged,
    Reauthenticate,
    Error,
}

impl Outcome {
    /// Label for metrics/logging.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Reauthenticate => "reauthenticate",
            Outcome::Error => "error",
        }
    }
}

/// Counts per outcome for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub reauthenticate: usize,
    pub errors: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Reauthenticate => self.reauthenticate += 1,
            Outcome::Error => self.errors += 1,
        }
    }
}

/// Refresh a single user and persist the result.
pub async fn refresh_one(
    refreshable: &dyn Refreshable,
    store: &AuthStateStore,
    user: &str,
) -> Outcome {
    let started = Instant::now();
    let auth_state = store.get(user).await;

    let outcome = match refresh_user(refreshable, user, auth_state.as_ref()).await {
        Ok(RefreshUserResponse::Update(new_state)) => {
            match store.put(user.to_string(), new_state).await {
                Ok(()) => Outcome::Updated,
                Err(e) => {
                    error!(user, error = %e, "failed to persist refreshed auth state");
                    Outcome::Error
                }
            }
        }
        Ok(RefreshUserResponse::UpToDate) => Outcome::Unchanged,
        Ok(RefreshUserResponse::Reauthenticate) => {
            warn!(user, "auth state can no longer be refreshed, user must log in again");
            Outcome::Reauthenticate
        }
        Err(e) => {
            error!(user, error = %e, "refresh failed");
            Outcome::Error
        }
    };

    metrics::record_refresh(outcome.label(), started.elapsed().as_secs_f64());
    debug!(user, outcome = outcome.label(), "user refreshed");
    outcome
}

/// Run one refresh cycle over `users`, or over every stored user when `None`.
pub async fn refresh_cycle(
    refreshable: &dyn Refreshable,
    store: &AuthStateStore,
    users: Option<&[String]>,
) -> CycleSummary {
    if let Err(e) = store.reload().await {
        warn!(error = %e, "failed to reload auth states, using last known copy");
    }

    let users = match users {
        Some(users) => users.to_vec(),
        None => store.users().await,
    };

    let mut summary = CycleSummary::default();
    for user in &users {
        summary.record(refresh_one(refreshable, store, user).await);
    }

    metrics::set_auth_states(store.len().await);
    info!(
        provider = refreshable.id(),
        users = users.len(),
        updated = summary.updated,
        unchanged = summary.unchanged,
        reauthenticate = summary.reauthenticate,
        errors = summary.errors,
        "refresh cycle complete"
    );
    summary
}

/// Spawn the periodic refresh task.
///
/// Runs every `auth_refresh_age`. The first cycle runs immediately when the
/// authenticator asks for pre-spawn refreshes; otherwise it waits one full
/// interval, as the stored tokens were just loaded.
pub fn spawn_refresh_task(
    refreshable: Arc<dyn Refreshable>,
    store: Arc<AuthStateStore>,
    last_cycle: Arc<RwLock<Option<CycleSummary>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refreshable.auth_refresh_age());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        if !refreshable.refresh_pre_spawn() {
            // interval's first tick completes immediately
            ticker.tick().await;
        }

        loop {
            ticker.tick().await;
            let summary = refresh_cycle(refreshable.as_ref(), &store, None).await;
            *last_cycle.write().await = Some(summary);
        }
    })
}
