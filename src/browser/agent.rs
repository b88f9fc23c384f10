//! Browser agent
//!
//! Binds a browser id to the pool sessions of that browser are taken from.

use std::fmt;
use std::sync::Arc;

use super::pool::{BrowserPool, PoolError, Session};

/// Per-browser handle on the session pool
#[derive(Clone)]
pub struct BrowserAgent {
    browser_id: String,
    pool: Arc<dyn BrowserPool>,
}

impl BrowserAgent {
    pub fn new(browser_id: impl Into<String>, pool: Arc<dyn BrowserPool>) -> Self {
        Self {
            browser_id: browser_id.into(),
            pool,
        }
    }

    pub fn browser_id(&self) -> &str {
        &self.browser_id
    }

    pub async fn acquire(&self) -> Result<Session, PoolError> {
        self.pool.acquire(&self.browser_id).await
    }

    pub async fn release(&self, session: Session) -> Result<(), PoolError> {
        self.pool.release(session).await
    }
}

impl fmt::Debug for BrowserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserAgent")
            .field("browser_id", &self.browser_id)
            .finish()
    }
}
