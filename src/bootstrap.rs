//! Session bootstrap state machine
//!
//! [`reduce`] is the whole decision table: a pure `(state, event)` step that
//! yields the next state plus the effects the driver must run. The
//! [`Bootstrapper`] owns the seams (storage, location, backend, navigator),
//! runs effects, feeds their results back in as events and publishes every
//! state on a watch channel.
//!
//! ```text
//! Init ─┬─ OAuthCallbackPending
//!       ├─ Authenticated                       (session on the URL)
//!       └─ CheckingStoredSession ─ ProbingExistingSession ─┬─ Authenticated
//!                                                          ├─ Redirecting
//!                                                          ├─ CooldownBlocked
//!                                                          ├─ NoSessionNoAutoLaunch
//!                                                          ├─ DegradedBackendReachable
//!                                                          └─ DemoFallback
//! ```

use crate::backend::{Backend, StatusResponse};
use crate::config::BootstrapPolicy;
use crate::launch::{self, LaunchSignal, PageLocation};
use crate::loop_guard::LoopGuard;
use crate::probe::{ProbeOutcome, StatusProbe};
use crate::reauth::{Navigator, ReauthCoordinator, ReauthError, ReauthTrigger};
use crate::session::{Session, SessionStore};
use crate::storage::Storage;
use crate::view::AuthView;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};
use url::Url;

/// A confirmed session plus what the status endpoint said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub session: Session,
    /// Seconds left on the backend token, when known.
    pub time_remaining: Option<u64>,
    pub fhir_base: Option<String>,
}

impl AuthenticatedSession {
    fn delivered(session_id: String, patient_id: Option<String>) -> Self {
        Self {
            session: Session::delivered(session_id, patient_id),
            time_remaining: None,
            fhir_base: None,
        }
    }

    fn from_status(session_id: Option<String>, status: &StatusResponse) -> Self {
        Self {
            session: Session {
                session_id,
                patient_id: status.patient.clone(),
                expires_at: status.expires_at(),
                sandbox_mode: status.sandbox_mode,
            },
            time_remaining: status.time_remaining,
            fhir_base: status.fhir_base.clone(),
        }
    }
}

/// Why the app fell back to demo data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackCause {
    Timeout { after: Duration },
    Unreachable { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BootstrapState {
    #[default]
    Init,
    /// The backend redirect chain is resolving; nothing to do locally.
    OAuthCallbackPending,
    CheckingStoredSession,
    ProbingExistingSession {
        session_id: Option<String>,
    },
    Authenticated(AuthenticatedSession),
    DemoFallback(FallbackCause),
    /// The backend answered, but not with a usable status.
    DegradedBackendReachable {
        status: u16,
        detail: String,
    },
    /// Auto-launch is due but the loop guard is still cooling down.
    CooldownBlocked {
        remaining: Duration,
        sandbox_mode: bool,
    },
    /// Unauthenticated, waiting for the user to start a launch.
    NoSessionNoAutoLaunch {
        sandbox_mode: bool,
        reason: Option<String>,
    },
    /// A full-page navigation to the launch endpoint was issued.
    Redirecting {
        trigger: ReauthTrigger,
        sandbox_mode: bool,
    },
}

impl BootstrapState {
    pub fn sandbox_mode(&self) -> bool {
        match self {
            Self::Authenticated(auth) => auth.session.sandbox_mode,
            Self::CooldownBlocked { sandbox_mode, .. }
            | Self::NoSessionNoAutoLaunch { sandbox_mode, .. }
            | Self::Redirecting { sandbox_mode, .. } => *sandbox_mode,
            _ => false,
        }
    }

    /// Still working out where to land.
    pub fn is_checking(&self) -> bool {
        matches!(
            self,
            Self::Init
                | Self::OAuthCallbackPending
                | Self::CheckingStoredSession
                | Self::ProbingExistingSession { .. }
                | Self::Redirecting { .. }
        )
    }
}

/// Facts the auto-launch decision needs, read at the moment of decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchPolicy {
    pub auto_launch: bool,
    pub cooldown_remaining: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapEvent {
    UrlClassified(LaunchSignal),
    StoredSessionLoaded(Option<String>),
    ProbeSettled {
        outcome: ProbeOutcome,
        policy: LaunchPolicy,
    },
    ReauthNavigated(ReauthTrigger),
    ReauthConflicted {
        status: u16,
    },
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    PersistSession(String),
    StripLaunchParams,
    LoadStoredSession,
    StartProbe(Option<String>),
    ClearAttempt,
    ClearStoredSession,
    TriggerAutoReauth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: BootstrapState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: BootstrapState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// One step of the bootstrap. Events that do not apply leave the state as is.
pub fn reduce(state: BootstrapState, event: BootstrapEvent) -> Transition {
    use BootstrapEvent as E;
    use BootstrapState as S;

    match (state, event) {
        (S::Init, E::UrlClassified(signal)) => match signal {
            LaunchSignal::OAuthCallbackPending => Transition::to(S::OAuthCallbackPending),
            LaunchSignal::SessionFromUrl {
                session_id,
                patient_id,
            } => Transition::to(S::Authenticated(AuthenticatedSession::delivered(
                session_id.clone(),
                patient_id,
            )))
            .with([Effect::PersistSession(session_id), Effect::StripLaunchParams]),
            LaunchSignal::NoSignal => {
                Transition::to(S::CheckingStoredSession).with([Effect::LoadStoredSession])
            }
        },

        (S::CheckingStoredSession, E::StoredSessionLoaded(session_id)) => {
            Transition::to(S::ProbingExistingSession {
                session_id: session_id.clone(),
            })
            .with([Effect::StartProbe(session_id)])
        }

        (S::ProbingExistingSession { session_id }, E::ProbeSettled { outcome, policy }) => {
            settle_probe(session_id, outcome, policy)
        }

        (
            S::Redirecting {
                trigger: ReauthTrigger::Automatic,
                sandbox_mode,
            },
            E::ReauthConflicted { status },
        ) => Transition::to(S::NoSessionNoAutoLaunch {
            sandbox_mode,
            reason: Some(ReauthError::LaunchConflict { status }.to_string()),
        }),

        (state, E::ReauthNavigated(trigger)) => Transition::to(S::Redirecting {
            trigger,
            sandbox_mode: state.sandbox_mode(),
        }),

        (state, E::LoggedOut) => Transition::to(S::NoSessionNoAutoLaunch {
            sandbox_mode: state.sandbox_mode(),
            reason: None,
        })
        .with([Effect::ClearStoredSession]),

        (state, event) => {
            trace!(?state, ?event, "event ignored in current state");
            Transition::to(state)
        }
    }
}

fn settle_probe(
    session_id: Option<String>,
    outcome: ProbeOutcome,
    policy: LaunchPolicy,
) -> Transition {
    use BootstrapState as S;

    match outcome {
        ProbeOutcome::Success(status) if status.authenticated => Transition::to(S::Authenticated(
            AuthenticatedSession::from_status(session_id, &status),
        ))
        .with([Effect::ClearAttempt]),

        ProbeOutcome::Success(status) => {
            let mut effects = Vec::new();
            if session_id.is_some() {
                // The backend no longer knows this id.
                effects.push(Effect::ClearStoredSession);
            }

            let sandbox_mode = status.sandbox_mode;
            let eligible = sandbox_mode || policy.auto_launch;
            let state = match (eligible, policy.cooldown_remaining) {
                (true, None) => {
                    effects.push(Effect::TriggerAutoReauth);
                    S::Redirecting {
                        trigger: ReauthTrigger::Automatic,
                        sandbox_mode,
                    }
                }
                (true, Some(remaining)) => S::CooldownBlocked {
                    remaining,
                    sandbox_mode,
                },
                (false, _) => S::NoSessionNoAutoLaunch {
                    sandbox_mode,
                    reason: status.reason,
                },
            };
            Transition::to(state).with(effects)
        }

        ProbeOutcome::Degraded { status, detail } => {
            Transition::to(S::DegradedBackendReachable { status, detail })
        }
        ProbeOutcome::Unreachable { detail } => {
            Transition::to(S::DemoFallback(FallbackCause::Unreachable { detail }))
        }
        ProbeOutcome::Timeout { after } => {
            Transition::to(S::DemoFallback(FallbackCause::Timeout { after }))
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Runs the bootstrap for one page mount.
pub struct Bootstrapper {
    policy: BootstrapPolicy,
    backend: Arc<dyn Backend>,
    location: Arc<dyn PageLocation>,
    sessions: SessionStore,
    guard: LoopGuard,
    probe: StatusProbe,
    reauth: ReauthCoordinator,
    state: watch::Sender<BootstrapState>,
    mounted: AtomicBool,
}

impl Bootstrapper {
    pub fn new(
        policy: BootstrapPolicy,
        backend: Arc<dyn Backend>,
        storage: Arc<dyn Storage>,
        location: Arc<dyn PageLocation>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let sessions = SessionStore::new(Arc::clone(&storage));
        let guard = LoopGuard::new(storage, policy.cooldown);
        let probe = StatusProbe::new(Arc::clone(&backend), policy.probe_timeout);
        let reauth = ReauthCoordinator::new(
            Arc::clone(&backend),
            navigator,
            guard.clone(),
            policy.manual_reauth_arms_cooldown,
        );
        let (state, _rx) = watch::channel(BootstrapState::Init);

        Self {
            policy,
            backend,
            location,
            sessions,
            guard,
            probe,
            reauth,
            state,
            mounted: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn view(&self) -> AuthView {
        AuthView::from(&*self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn loop_guard(&self) -> &LoopGuard {
        &self.guard
    }

    /// Run the bootstrap once. Later calls return the current view.
    pub async fn mount(&self) -> AuthView {
        if self.mounted.swap(true, Ordering::SeqCst) {
            debug!("bootstrap already mounted");
            return self.view();
        }

        let signal = launch::classify(&self.location.current());
        info!(?signal, "launch parameters classified");
        self.dispatch(BootstrapEvent::UrlClassified(signal)).await;
        self.view()
    }

    /// User-initiated launch. Fails only when a launch is already pending.
    pub async fn trigger_reauth(&self) -> Result<(), ReauthError> {
        let target = self.launch_target();
        self.reauth
            .trigger_reauth(ReauthTrigger::Manual, &target)
            .await?;
        self.dispatch(BootstrapEvent::ReauthNavigated(ReauthTrigger::Manual))
            .await;
        Ok(())
    }

    pub async fn logout(&self) {
        self.dispatch(BootstrapEvent::LoggedOut).await;
    }

    fn launch_target(&self) -> Url {
        let ehr = launch::ehr_launch(&self.location.current());
        self.backend.launch_url(ehr.as_ref())
    }

    async fn dispatch(&self, event: BootstrapEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let current = self.state.borrow().clone();
            let Transition { state, effects } = reduce(current, event);
            if *self.state.borrow() != state {
                info!(?state, "bootstrap state");
            }
            self.state.send_replace(state);

            for effect in effects {
                if let Some(next) = self.apply(effect).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn apply(&self, effect: Effect) -> Option<BootstrapEvent> {
        trace!(?effect, "applying effect");
        match effect {
            Effect::PersistSession(session_id) => {
                self.sessions.set(&session_id);
                None
            }
            Effect::StripLaunchParams => {
                let stripped = launch::strip_launch_params(&self.location.current());
                self.location.replace(stripped);
                None
            }
            Effect::LoadStoredSession => {
                Some(BootstrapEvent::StoredSessionLoaded(self.sessions.get()))
            }
            Effect::StartProbe(session_id) => {
                if !self.policy.probe_delay.is_zero() {
                    tokio::time::sleep(self.policy.probe_delay).await;
                }
                let outcome = self.probe.run(session_id).await;
                let policy = LaunchPolicy {
                    auto_launch: self.policy.auto_launch,
                    cooldown_remaining: self.guard.cooldown_remaining(),
                };
                Some(BootstrapEvent::ProbeSettled { outcome, policy })
            }
            Effect::ClearAttempt => {
                self.guard.clear_attempt();
                None
            }
            Effect::ClearStoredSession => {
                self.sessions.clear();
                None
            }
            Effect::TriggerAutoReauth => {
                let target = self.launch_target();
                match self
                    .reauth
                    .trigger_reauth(ReauthTrigger::Automatic, &target)
                    .await
                {
                    Ok(()) => Some(BootstrapEvent::ReauthNavigated(ReauthTrigger::Automatic)),
                    Err(e) => Some(BootstrapEvent::ReauthConflicted { status: e.status() }),
                }
            }
        }
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("policy", &self.policy)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
