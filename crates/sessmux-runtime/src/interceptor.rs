//! Global response interceptor.
//!
//! Any `401 Unauthorized` observed from any request flips the session to
//! the expired path immediately, independent of (and preempting) the
//! inactivity countdown.

use http::StatusCode;

use crate::provider::SessionHandle;

#[derive(Clone)]
pub struct UnauthorizedInterceptor {
    handle: SessionHandle,
}

impl UnauthorizedInterceptor {
    pub fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }

    /// Feed every response status through here; non-401 statuses are
    /// ignored.
    pub fn observe_status(&self, status: StatusCode) {
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("401 observed, declaring session expired");
            self.handle.notify_unauthorized();
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
