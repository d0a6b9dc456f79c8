//! Bounded-time session status probe
//!
//! One GET to the status endpoint races a fixed deadline. The request runs on
//! its own task; whichever of the request and the deadline settles first
//! writes the single [`ResultSlot`], and the deadline path aborts the request
//! task. A late reply finds the slot taken and is dropped.

use crate::backend::{Backend, HttpReply, StatusResponse};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default probe deadline
pub const PROBE_DEADLINE: Duration = Duration::from_millis(2_000);

/// How a status probe settled. Exactly one per probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx with a parseable body.
    Success(StatusResponse),
    /// The server answered but not usefully: non-2xx, or a 2xx body that
    /// does not parse.
    Degraded { status: u16, detail: String },
    /// Connection refused, DNS failure and the like.
    Unreachable { detail: String },
    /// The deadline passed first.
    Timeout { after: Duration },
}

impl ProbeOutcome {
    fn from_reply(reply: HttpReply) -> Self {
        if !reply.is_success() {
            return Self::Degraded {
                status: reply.status,
                detail: format!("HTTP {}", reply.status),
            };
        }
        match serde_json::from_str::<StatusResponse>(&reply.body) {
            Ok(response) => Self::Success(response),
            Err(e) => Self::Degraded {
                status: reply.status,
                detail: format!("malformed status body: {e}"),
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Degraded { .. } => "degraded",
            Self::Unreachable { .. } => "unreachable",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Write-once result cell shared by the request task and the deadline.
#[derive(Debug, Default)]
pub struct ResultSlot {
    cell: OnceLock<ProbeOutcome>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `outcome` if nothing has settled yet. Returns whether it won.
    pub fn settle(&self, outcome: ProbeOutcome) -> bool {
        self.cell.set(outcome).is_ok()
    }

    pub fn get(&self) -> Option<&ProbeOutcome> {
        self.cell.get()
    }
}

#[derive(Clone)]
pub struct StatusProbe {
    backend: Arc<dyn Backend>,
    deadline: Duration,
}

impl StatusProbe {
    pub fn new(backend: Arc<dyn Backend>, deadline: Duration) -> Self {
        Self { backend, deadline }
    }

    pub async fn run(&self, session_id: Option<String>) -> ProbeOutcome {
        let slot = Arc::new(ResultSlot::new());

        let request_slot = Arc::clone(&slot);
        let backend = Arc::clone(&self.backend);
        let mut request = tokio::spawn(async move {
            let outcome = match backend.auth_status(session_id.as_deref()).await {
                Ok(reply) => ProbeOutcome::from_reply(reply),
                Err(e) => ProbeOutcome::Unreachable {
                    detail: e.to_string(),
                },
            };
            if !request_slot.settle(outcome) {
                debug!("late status reply discarded");
            }
        });

        tokio::select! {
            joined = &mut request => {
                if let Err(e) = joined {
                    warn!(error = %e, "status request task failed");
                    slot.settle(ProbeOutcome::Unreachable { detail: e.to_string() });
                }
            }
            _ = tokio::time::sleep(self.deadline) => {
                if slot.settle(ProbeOutcome::Timeout { after: self.deadline }) {
                    request.abort();
                }
            }
        }

        let outcome = slot.get().cloned().unwrap_or(ProbeOutcome::Timeout {
            after: self.deadline,
        });
        info!(outcome = outcome.kind(), "status probe settled");
        outcome
    }
}

impl std::fmt::Debug for StatusProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusProbe")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
