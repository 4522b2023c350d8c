//! User-agent navigation seam.
//!
//! Login and logout end with control leaving the application: the user agent
//! is sent to the identity provider. [`UserAgent`] keeps that side effect
//! behind a trait so the facade stays testable and failure *detection*
//! (exchanger, pipeline) stays separate from failure *response* (navigation).

use tracing::info;

use crate::error::Result;

/// Something that can navigate to a URL on the user's behalf.
pub trait UserAgent: Send + Sync {
    /// Navigate the user agent to the given URL.
    fn navigate(&self, url: &str) -> Result<()>;
}

/// Opens URLs in the system browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn navigate(&self, url: &str) -> Result<()> {
        info!(%url, "opening system browser");
        open::that(url)?;
        Ok(())
    }
}

/// Test double for the navigation seam, used by this crate's own tests and
/// available to embedders writing theirs.
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records navigations instead of performing them.
    #[derive(Debug, Default)]
    pub struct RecordingUserAgent {
        visited: Mutex<Vec<String>>,
    }

    impl RecordingUserAgent {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn visited(&self) -> Vec<String> {
            self.visited.lock().unwrap().clone()
        }
    }

    impl UserAgent for RecordingUserAgent {
        fn navigate(&self, url: &str) -> Result<()> {
            self.visited.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }
}
