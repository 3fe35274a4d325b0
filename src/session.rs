//! Per-connection authentication state

use crate::error::{AuthError, Result};

/// The user bound to a connection by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    /// The database has no credential table; nothing is gated.
    Open,
    Authenticated(Identity),
    /// A login attempt failed; everything is refused until the next success.
    Denied,
}

/// Encapsulated login state for a single connection
#[derive(Debug)]
pub struct Session {
    access: Access,
}

impl Session {
    pub fn open() -> Self {
        Self { access: Access::Open }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            access: Access::Authenticated(identity),
        }
    }

    pub fn authenticate(&mut self, identity: Identity) {
        self.access = Access::Authenticated(identity);
    }

    pub fn deny(&mut self) {
        self.access = Access::Denied;
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.access {
            Access::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    /// True for connections to a database without a credential table.
    pub fn is_open(&self) -> bool {
        self.access == Access::Open
    }

    /// The login gate: anything other than a denied session may run statements.
    pub fn require_login(&self) -> Result<()> {
        match self.access {
            Access::Denied => Err(AuthError::Unauthorized),
            _ => Ok(()),
        }
    }

    /// Open sessions count as admin since there is nobody to defer to.
    pub fn require_admin(&self) -> Result<()> {
        match &self.access {
            Access::Open => Ok(()),
            Access::Authenticated(identity) if identity.is_admin => Ok(()),
            Access::Authenticated(_) => Err(AuthError::AdminRequired),
            Access::Denied => Err(AuthError::Unauthorized),
        }
    }

    pub fn is_current_user(&self, username: &str) -> bool {
        self.identity().is_some_and(|id| id.username == username)
    }

    /// Refresh the bound admin flag after the current user's record changed.
    pub fn set_admin(&mut self, is_admin: bool) {
        if let Access::Authenticated(identity) = &mut self.access {
            identity.is_admin = is_admin;
        }
    }
}
