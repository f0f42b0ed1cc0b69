//! Security boundary.
//!
//! # Responsibilities
//! - Turn the authentication layer's output into a [`CallerIdentity`]
//!
//! # Design Decisions
//! - The governor never authenticates; it trusts the identity it is handed
//! - `X-Forwarded-For` is ignored unless explicitly trusted

pub mod identity;

pub use identity::{resolve_identity, CallerIdentity};
