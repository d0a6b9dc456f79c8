//! Read-only auth view consumed by the dashboard

use crate::bootstrap::{BootstrapState, FallbackCause};
use serde::Serialize;
use std::time::Duration;

/// What the rest of the app sees of the bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthView {
    pub is_authenticated: bool,
    pub is_checking: bool,
    pub session_id: Option<String>,
    pub patient: Option<String>,
    pub sandbox_mode: bool,
    /// Seconds left on the backend token.
    pub time_remaining: Option<u64>,
    pub backend_available: bool,
    pub auth_error: Option<String>,
}

impl From<&BootstrapState> for AuthView {
    fn from(state: &BootstrapState) -> Self {
        let mut view = AuthView {
            is_authenticated: false,
            is_checking: state.is_checking(),
            session_id: None,
            patient: None,
            sandbox_mode: state.sandbox_mode(),
            time_remaining: None,
            backend_available: true,
            auth_error: None,
        };

        match state {
            BootstrapState::Authenticated(auth) => {
                view.is_authenticated = true;
                view.session_id = auth.session.session_id.clone();
                view.patient = auth.session.patient_id.clone();
                view.time_remaining = auth.time_remaining;
            }
            BootstrapState::DemoFallback(cause) => {
                view.backend_available = false;
                view.auth_error = Some(match cause {
                    FallbackCause::Timeout { after } => format!(
                        "Backend did not answer within {}; showing demo data",
                        format_duration(*after)
                    ),
                    FallbackCause::Unreachable { detail } => {
                        format!("Backend unreachable ({detail}); showing demo data")
                    }
                });
            }
            BootstrapState::DegradedBackendReachable { detail, .. } => {
                view.auth_error = Some(format!("Backend reachable, status check failed: {detail}"));
            }
            BootstrapState::CooldownBlocked { remaining, .. } => {
                view.auth_error = Some(format!(
                    "Automatic sign-in paused to avoid a redirect loop; retry in {} or sign in manually",
                    format_duration(*remaining)
                ));
            }
            BootstrapState::NoSessionNoAutoLaunch { reason, .. } => {
                view.auth_error = reason.clone();
            }
            BootstrapState::Init
            | BootstrapState::OAuthCallbackPending
            | BootstrapState::CheckingStoredSession
            | BootstrapState::ProbingExistingSession { .. }
            | BootstrapState::Redirecting { .. } => {}
        }

        view
    }
}

/// Whole seconds, rounded up so "0s" never shows while time is left.
fn format_duration(d: Duration) -> String {
    let secs = d.as_millis().div_ceil(1000);
    format!("{secs}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::AuthenticatedSession;
    use crate::reauth::ReauthTrigger;
    use crate::session::Session;

    #[test]
    fn init_is_checking_and_optimistic() {
        let view = AuthView::from(&BootstrapState::Init);
        assert!(view.is_checking);
        assert!(!view.is_authenticated);
        assert!(view.backend_available);
        assert!(view.auth_error.is_none());
    }

    #[test]
    fn authenticated_view() {
        let state = BootstrapState::Authenticated(AuthenticatedSession {
            session: Session {
                session_id: Some("abc".into()),
                patient_id: Some("123".into()),
                expires_at: None,
                sandbox_mode: true,
            },
            time_remaining: Some(42),
            fhir_base: None,
        });
        let view = AuthView::from(&state);
        assert!(view.is_authenticated);
        assert!(!view.is_checking);
        assert_eq!(view.session_id.as_deref(), Some("abc"));
        assert_eq!(view.patient.as_deref(), Some("123"));
        assert!(view.sandbox_mode);
        assert_eq!(view.time_remaining, Some(42));
    }

    #[test]
    fn timeout_fallback_reports_offline() {
        let view = AuthView::from(&BootstrapState::DemoFallback(FallbackCause::Timeout {
            after: Duration::from_millis(2_000),
        }));
        assert!(!view.backend_available);
        assert!(!view.is_checking);
        assert!(view.auth_error.unwrap().contains("2s"));
    }

    #[test]
    fn degraded_keeps_backend_available() {
        let view = AuthView::from(&BootstrapState::DegradedBackendReachable {
            status: 500,
            detail: "HTTP 500".into(),
        });
        assert!(view.backend_available);
        let error = view.auth_error.unwrap();
        assert!(error.contains("reachable"));
        assert!(error.contains("HTTP 500"));
    }

    #[test]
    fn cooldown_message_rounds_up() {
        let view = AuthView::from(&BootstrapState::CooldownBlocked {
            remaining: Duration::from_millis(26_100),
            sandbox_mode: true,
        });
        assert!(view.auth_error.unwrap().contains("27s"));
    }

    #[test]
    fn redirecting_is_still_checking() {
        let view = AuthView::from(&BootstrapState::Redirecting {
            trigger: ReauthTrigger::Automatic,
            sandbox_mode: true,
        });
        assert!(view.is_checking);
        assert!(view.sandbox_mode);
    }

    #[test]
    fn view_serializes_camel_case() {
        let json = serde_json::to_string(&AuthView::from(&BootstrapState::Init)).unwrap();
        assert!(json.contains("\"isAuthenticated\":false"));
        assert!(json.contains("\"backendAvailable\":true"));
        assert!(json.contains("\"authError\":null"));
    }
}
