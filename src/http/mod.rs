//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs     (axum setup, tower layers)
//!     → request.rs    (request id)
//!     → middleware.rs (governance pipeline)
//!     → proxy.rs      (forward to upstream)
//!     → response.rs   (governance headers, cache capture/replay)
//!     → Send to client
//! ```

pub mod middleware;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{governance_middleware, GovernanceState};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
