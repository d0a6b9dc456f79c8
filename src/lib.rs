//! triage-auth — session bootstrap for the PE rule-out dashboard
//!
//! Decides on every page load whether the dashboard is signed in to the live
//! clinical backend, should launch a SMART sign-in, must hold off to avoid a
//! redirect loop, or should fall back to demo data.

mod session;
mod time;

pub use session::*;

pub mod backend;
pub mod bootstrap;
pub mod browser;
pub mod config;
pub mod launch;
pub mod loop_guard;
pub mod probe;
pub mod reauth;
pub mod storage;
pub mod view;

pub use bootstrap::{BootstrapState, Bootstrapper};
pub use loop_guard::LoopGuard;
pub use view::AuthView;
