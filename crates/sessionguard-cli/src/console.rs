//! Terminal stand-ins for the notifier and navigator.

use sessionguard_core::{Navigator, NoticeLevel, Notifier};

/// Prints notices to stderr, one per line.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show(&self, level: NoticeLevel, message: &str) {
        let prefix = match level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{}] {}", prefix, message);
    }
}

/// There is no router in a terminal; a redirect to the login page becomes a
/// hint to run `sessionguard login`.
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate_to(&self, path: &str) {
        eprintln!("Redirected to {} - run `sessionguard login` to continue.", path);
    }
}
