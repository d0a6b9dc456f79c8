//! Navigators for the CLI host
//!
//! `SystemBrowser` hands the launch URL to the platform opener, the way a
//! top-level `window.location` assignment would in the dashboard.

use crate::reauth::Navigator;
use std::process::Command as ProcessCommand;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl SystemBrowser {
    #[cfg(target_os = "macos")]
    fn command(url: &Url) -> ProcessCommand {
        let mut cmd = ProcessCommand::new("open");
        cmd.arg(url.as_str());
        cmd
    }

    #[cfg(target_os = "windows")]
    fn command(url: &Url) -> ProcessCommand {
        let mut cmd = ProcessCommand::new("cmd");
        // Empty title argument, otherwise `start` treats the URL as one.
        cmd.args(["/C", "start", "", url.as_str()]);
        cmd
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    fn command(url: &Url) -> ProcessCommand {
        let mut cmd = ProcessCommand::new("xdg-open");
        cmd.arg(url.as_str());
        cmd
    }
}

impl Navigator for SystemBrowser {
    fn navigate(&self, url: &Url) {
        match Self::command(url).status() {
            Ok(status) if status.success() => debug!(%url, "browser opened"),
            Ok(status) => warn!(%url, ?status, "browser opener exited with failure"),
            Err(e) => warn!(%url, error = %e, "failed to run browser opener"),
        }
    }
}

/// Prints the URL instead of opening it (`--no-open`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, url: &Url) {
        println!("Open to continue sign-in: {url}");
    }
}
