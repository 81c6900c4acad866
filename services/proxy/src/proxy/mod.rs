//! Proxy plumbing shared by all sessions.
//!
//! ```text
//! client -> Listener -> session::serve -> Registry (domain -> BackendGroup)
//!                                              |
//!                                       BackendGroup::select -> BackendSession -> backend
//! ```

mod listener;
mod registry;
mod relay;
mod selector;

pub use listener::{Listener, ProxyStats};
pub use registry::{ActiveSession, Registry};
pub use relay::{BackendSession, RelayEnd, DEFAULT_CONNECT_TIMEOUT};
pub use selector::{normalize_domain, BackendGroup, SelectionAlgorithm};
