//! Conflict-aware reauthentication
//!
//! Every launch goes through a preflight GET with redirects disabled. A 409
//! means another launch is already pending for this caller, so no navigation
//! happens and the caller gets [`ReauthError::LaunchConflict`]. Anything else
//! ends in a full top-level navigation to the launch endpoint: only a real
//! navigation carries the cookie and OAuth state the identity provider needs.

use crate::backend::Backend;
use crate::loop_guard::LoopGuard;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Full-page navigation. Fire and forget: nothing after it is observable.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url);
}

/// Who asked for the launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthTrigger {
    Automatic,
    Manual,
}

/// The only error the bootstrap core lets escape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReauthError {
    #[error("a launch is already in progress (HTTP {status})")]
    LaunchConflict { status: u16 },
}

impl ReauthError {
    pub fn status(&self) -> u16 {
        match self {
            Self::LaunchConflict { status } => *status,
        }
    }
}

const CONFLICT: u16 = 409;

#[derive(Clone)]
pub struct ReauthCoordinator {
    backend: Arc<dyn Backend>,
    navigator: Arc<dyn Navigator>,
    guard: LoopGuard,
    manual_arms_cooldown: bool,
}

impl ReauthCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        navigator: Arc<dyn Navigator>,
        guard: LoopGuard,
        manual_arms_cooldown: bool,
    ) -> Self {
        Self {
            backend,
            navigator,
            guard,
            manual_arms_cooldown,
        }
    }

    /// Preflight `launch_url` and navigate to it unless a launch is pending.
    pub async fn trigger_reauth(
        &self,
        trigger: ReauthTrigger,
        launch_url: &Url,
    ) -> Result<(), ReauthError> {
        if trigger == ReauthTrigger::Automatic || self.manual_arms_cooldown {
            self.guard.record_attempt();
        }

        match self.backend.preflight(launch_url).await {
            Ok(CONFLICT) => {
                warn!(?trigger, "launch already in progress, not navigating");
                return Err(ReauthError::LaunchConflict { status: CONFLICT });
            }
            Ok(status) if (300..400).contains(&status) => {
                info!(?trigger, status, "launch preflight redirected");
            }
            Ok(status) => {
                warn!(?trigger, status, "unexpected launch preflight status, navigating anyway");
            }
            Err(e) => {
                warn!(?trigger, error = %e, "launch preflight failed, navigating anyway");
            }
        }

        info!(url = %launch_url, "navigating to launch endpoint");
        self.navigator.navigate(launch_url);
        Ok(())
    }
}

impl std::fmt::Debug for ReauthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReauthCoordinator")
            .field("guard", &self.guard)
            .field("manual_arms_cooldown", &self.manual_arms_cooldown)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HttpReply, TransportError};
    use crate::launch::EhrLaunch;
    use crate::loop_guard::COOLDOWN;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct PreflightBackend {
        reply: Result<u16, TransportError>,
        preflights: Mutex<Vec<Url>>,
    }

    #[async_trait]
    impl Backend for PreflightBackend {
        async fn auth_status(&self, _session_id: Option<&str>) -> Result<HttpReply, TransportError> {
            unreachable!("reauth never probes status")
        }

        async fn preflight(&self, url: &Url) -> Result<u16, TransportError> {
            self.preflights.lock().unwrap().push(url.clone());
            self.reply.clone()
        }

        fn launch_url(&self, _ehr: Option<&EhrLaunch>) -> Url {
            launch()
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visits: Mutex<Vec<Url>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, url: &Url) {
            self.visits.lock().unwrap().push(url.clone());
        }
    }

    fn launch() -> Url {
        Url::parse("http://backend.test/launch").unwrap()
    }

    struct Harness {
        backend: Arc<PreflightBackend>,
        navigator: Arc<RecordingNavigator>,
        guard: LoopGuard,
        coordinator: ReauthCoordinator,
    }

    fn harness(reply: Result<u16, TransportError>, manual_arms_cooldown: bool) -> Harness {
        let backend = Arc::new(PreflightBackend {
            reply,
            preflights: Mutex::new(Vec::new()),
        });
        let navigator = Arc::new(RecordingNavigator::default());
        let guard = LoopGuard::new(Arc::new(MemoryStorage::new()), COOLDOWN);
        let coordinator = ReauthCoordinator::new(
            backend.clone(),
            navigator.clone(),
            guard.clone(),
            manual_arms_cooldown,
        );
        Harness {
            backend,
            navigator,
            guard,
            coordinator,
        }
    }

    #[tokio::test]
    async fn conflict_rejects_without_navigation() {
        let h = harness(Ok(409), true);
        let err = h
            .coordinator
            .trigger_reauth(ReauthTrigger::Manual, &launch())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 409);
        assert!(h.navigator.visits.lock().unwrap().is_empty());
        // Attempt is stamped before the preflight.
        assert!(h.guard.is_in_cooldown());
    }

    #[tokio::test]
    async fn redirect_navigates_once() {
        for status in [302, 307] {
            let h = harness(Ok(status), true);
            h.coordinator
                .trigger_reauth(ReauthTrigger::Automatic, &launch())
                .await
                .unwrap();
            assert_eq!(*h.navigator.visits.lock().unwrap(), vec![launch()]);
            assert_eq!(*h.backend.preflights.lock().unwrap(), vec![launch()]);
        }
    }

    #[tokio::test]
    async fn preflight_failure_still_navigates() {
        let h = harness(Err(TransportError::Connect("refused".into())), true);
        h.coordinator
            .trigger_reauth(ReauthTrigger::Automatic, &launch())
            .await
            .unwrap();
        assert_eq!(h.navigator.visits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_status_still_navigates() {
        let h = harness(Ok(500), true);
        h.coordinator
            .trigger_reauth(ReauthTrigger::Manual, &launch())
            .await
            .unwrap();
        assert_eq!(h.navigator.visits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn automatic_always_arms_cooldown() {
        let h = harness(Ok(302), false);
        h.coordinator
            .trigger_reauth(ReauthTrigger::Automatic, &launch())
            .await
            .unwrap();
        assert!(h.guard.is_in_cooldown());
    }

    #[tokio::test]
    async fn manual_can_skip_cooldown_stamp() {
        let h = harness(Ok(302), false);
        h.coordinator
            .trigger_reauth(ReauthTrigger::Manual, &launch())
            .await
            .unwrap();
        assert!(!h.guard.is_in_cooldown());
        assert_eq!(h.navigator.visits.lock().unwrap().len(), 1);
    }
}
