//! Browser session management
//!
//! Pooled sessions and the per-browser agent the adapter acquires them
//! through.

mod agent;
mod pool;

pub use agent::BrowserAgent;
pub use pool::{BrowserPool, LocalPool, PoolError, Session, SessionInfo};
