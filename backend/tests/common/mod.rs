#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use community_portal::{
    AppConfig, AppState, AuthGateway, InMemoryRepository, ManualClock,
    clock::Clock,
    models::{Account, GlobalRole},
    repository::Repository,
};
use std::sync::Arc;

pub const PASSWORD: &str = "correct-horse-42";

/// Everything a test needs: the in-memory store, a controllable clock and a
/// gateway wired on top of both.
pub struct Harness {
    pub repo: Arc<InMemoryRepository>,
    pub clock: ManualClock,
    pub gateway: Arc<AuthGateway>,
    pub config: AppConfig,
}

pub fn harness() -> Harness {
    harness_with(AppConfig::default())
}

pub fn harness_with(config: AppConfig) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
    let gateway =
        Arc::new(AuthGateway::new(repo.clone(), Arc::new(clock.clone()), &config).unwrap());
    Harness {
        repo,
        clock,
        gateway,
        config,
    }
}

impl Harness {
    pub fn clock_now_ts(&self) -> i64 {
        self.clock.now().timestamp()
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            repo: self.repo.clone(),
            gateway: self.gateway.clone(),
            clock: Arc::new(self.clock.clone()),
            config: self.config.clone(),
        }
    }

    pub async fn signup(&self, identity: &str) -> Account {
        self.gateway.signup(identity, PASSWORD).await.unwrap()
    }

    pub async fn signup_admin(&self, identity: &str) -> Account {
        let account = self.signup(identity).await;
        self.repo
            .set_global_role(account.id, GlobalRole::Admin)
            .await
            .unwrap()
            .unwrap()
    }
}
