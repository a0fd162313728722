//! Navigation seam.
//!
//! The redirect side effect of a logout goes through this trait so the
//! embedding router stays out of the controller and tests can record
//! navigations instead of performing them.

use std::sync::Mutex;

pub trait Navigator: Send + Sync {
    /// The tab's current route (path + query + fragment).
    fn current_route(&self) -> String;

    /// History-replacing navigation; `reason` is attached as navigation
    /// state for the login screen.
    fn replace(&self, route: &str, reason: Option<&str>);
}

/// Navigator that only logs — used by the simulate harness.
#[derive(Debug)]
pub struct LogNavigator {
    route: Mutex<String>,
}

impl LogNavigator {
    pub fn new(initial_route: &str) -> Self {
        Self {
            route: Mutex::new(initial_route.to_owned()),
        }
    }
}

impl Navigator for LogNavigator {
    fn current_route(&self) -> String {
        self.route.lock().expect("route mutex poisoned").clone()
    }

    fn replace(&self, route: &str, reason: Option<&str>) {
        *self.route.lock().expect("route mutex poisoned") = route.to_owned();
        match reason {
            Some(reason) => tracing::info!("navigate (replace) to {route}: {reason}"),
            None => tracing::info!("navigate (replace) to {route}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_navigator_tracks_route() {
        let nav = LogNavigator::new("/admin/news");
        assert_eq!(nav.current_route(), "/admin/news");

        nav.replace("/login", Some("signed out"));
        assert_eq!(nav.current_route(), "/login");
    }
}
