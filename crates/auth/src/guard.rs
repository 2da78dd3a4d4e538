//! Access decisions for protected surfaces

use crate::session::{SessionPhase, SessionState};
use crate::types::User;

/// What a protected page should do with the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Startup restore is still running; show a placeholder
    Pending,
    /// No session; send the user to the login surface
    LoginRequired,
    /// Signed in but missing the required role
    Forbidden,
    Granted(User),
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted(_))
    }
}

impl SessionState {
    /// Check the session against an optional role requirement
    pub fn authorize(&self, required_role: Option<&str>) -> Access {
        match (self.phase(), self.current_user()) {
            (SessionPhase::Authenticated, Some(user)) => match required_role {
                Some(role) if !user.has_role(role) => Access::Forbidden,
                _ => Access::Granted(user.clone()),
            },
            (SessionPhase::Uninitialized, _) => Access::Pending,
            _ => Access::LoginRequired,
        }
    }
}
