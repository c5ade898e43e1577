//! User notices raised during a session

use tracing::{info, warn};
use url::Url;

/// Presentation of notices to the user
///
/// Notices are collected during the run and presented once it has ended.
pub trait UserInterface: Send + Sync {
    /// A newer client is available at `url`; `mandatory` if the server refused this one
    fn show_update_notice(&self, url: &Url, mandatory: bool);

    /// An error the user has to know about
    fn show_error_message(&self, message: &str);
}

/// Writes notices to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInterface;

impl UserInterface for LogInterface {
    fn show_update_notice(&self, url: &Url, mandatory: bool) {
        if mandatory {
            warn!("A client update is required, download it from {}", url);
        } else {
            info!("A client update is available at {}", url);
        }
    }

    fn show_error_message(&self, message: &str) {
        warn!("{}", message);
    }
}

/// A notice waiting for the end of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notice {
    Update { url: Url, mandatory: bool },
    Error(String),
}

impl Notice {
    pub(crate) fn present(&self, ui: &dyn UserInterface) {
        match self {
            Self::Update { url, mandatory } => ui.show_update_notice(url, *mandatory),
            Self::Error(message) => ui.show_error_message(message),
        }
    }
}
