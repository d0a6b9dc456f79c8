//! Launch parameter detection
//!
//! Classifies the page URL into the signal the bootstrap acts on. Only the
//! SMART launch contract parameters are inspected; anything else is ignored.

use std::sync::Mutex;
use tracing::warn;
use url::Url;

/// Query parameters of the launch contract.
pub const LAUNCH_PARAMS: &[&str] = &["iss", "launch", "code", "state", "session", "patient", "error"];

/// What the current URL says about an in-flight launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSignal {
    /// `code`+`state` or `error`: the backend redirect chain is mid-flight.
    OAuthCallbackPending,
    /// The backend finished the exchange and handed back a session.
    SessionFromUrl {
        session_id: String,
        patient_id: Option<String>,
    },
    NoSignal,
}

/// EHR-initiated launch context (`iss` + `launch`), forwarded to the launch endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EhrLaunch {
    pub iss: String,
    pub launch: String,
}

#[derive(Debug, Default)]
struct LaunchQuery {
    iss: Option<String>,
    launch: Option<String>,
    code: Option<String>,
    state: Option<String>,
    session: Option<String>,
    patient: Option<String>,
    error: Option<String>,
}

impl LaunchQuery {
    /// First non-empty occurrence of each contract parameter wins. `error`
    /// counts even when empty.
    fn parse(url: &Url) -> Self {
        let mut query = Self::default();
        for (key, value) in url.query_pairs() {
            if value.is_empty() && key != "error" {
                continue;
            }
            let slot = match key.as_ref() {
                "iss" => &mut query.iss,
                "launch" => &mut query.launch,
                "code" => &mut query.code,
                "state" => &mut query.state,
                "session" => &mut query.session,
                "patient" => &mut query.patient,
                "error" => &mut query.error,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        query
    }
}

/// Classify a page URL. Pure: no storage, no network.
pub fn classify(url: &Url) -> LaunchSignal {
    let query = LaunchQuery::parse(url);

    if (query.code.is_some() && query.state.is_some()) || query.error.is_some() {
        return LaunchSignal::OAuthCallbackPending;
    }

    match query.session {
        Some(session_id) => LaunchSignal::SessionFromUrl {
            session_id,
            // The backend renders a missing patient context as "None".
            patient_id: query.patient.filter(|p| p != "None" && p != "null"),
        },
        None => LaunchSignal::NoSignal,
    }
}

/// EHR launch context, when the page was opened with both `iss` and `launch`.
pub fn ehr_launch(url: &Url) -> Option<EhrLaunch> {
    let query = LaunchQuery::parse(url);
    Some(EhrLaunch {
        iss: query.iss?,
        launch: query.launch?,
    })
}

/// Copy of `url` with every launch contract parameter removed.
pub fn strip_launch_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !LAUNCH_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

// ---------------------------------------------------------------------------
// PageLocation
// ---------------------------------------------------------------------------

/// The page's address bar.
pub trait PageLocation: Send + Sync {
    fn current(&self) -> Url;
    /// Replace the visible URL without navigating.
    fn replace(&self, url: Url);
}

/// In-process location holding a single URL.
#[derive(Debug)]
pub struct StaticLocation {
    url: Mutex<Url>,
}

impl StaticLocation {
    pub fn new(url: Url) -> Self {
        Self {
            url: Mutex::new(url),
        }
    }
}

impl PageLocation for StaticLocation {
    fn current(&self) -> Url {
        match self.url.lock() {
            Ok(url) => url.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, url: Url) {
        match self.url.lock() {
            Ok(mut current) => *current = url,
            Err(_) => warn!("location lock poisoned, URL not replaced"),
        }
    }
}
