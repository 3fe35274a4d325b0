//! Prelude module that provides common imports
//!
//! `use userauth::prelude::*` brings in the connection types and the
//! crate's `Result`.

pub use crate::auth::{AuthConnection, ConnectOptions, UserRecord};
pub use crate::error::{AuthError, Result};
pub use crate::statement::Value;
