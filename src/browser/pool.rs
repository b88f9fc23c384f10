//! Browser session pool
//!
//! Hands out logical browser sessions, bounding how many sessions of each
//! browser may be held at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Browser pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Unknown browser: {0}")]
    UnknownBrowser(String),

    /// The session semaphore of the browser was closed
    #[error("Browser pool for {0} is closed")]
    Closed(String),

    #[error("Failed to release session {id} of {browser_id}: {reason}")]
    Release {
        id: u64,
        browser_id: String,
        reason: String,
    },
}

/// Public description of a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: u64,
    pub browser_id: String,
    pub started_at: DateTime<Utc>,
}

/// Exclusively held browser session
#[derive(Debug)]
pub struct Session {
    info: SessionInfo,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Session {
    pub fn new(info: SessionInfo, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            info,
            _permit: permit,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn browser_id(&self) -> &str {
        &self.info.browser_id
    }
}

/// Source of browser sessions
#[async_trait]
pub trait BrowserPool: Send + Sync {
    async fn acquire(&self, browser_id: &str) -> Result<Session, PoolError>;

    async fn release(&self, session: Session) -> Result<(), PoolError>;
}

/// In-process pool limited per browser by a semaphore
pub struct LocalPool {
    limits: HashMap<String, Arc<Semaphore>>,
    next_id: AtomicU64,
}

impl LocalPool {
    pub fn new() -> Self {
        Self {
            limits: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a browser with its session limit
    pub fn with_browser(mut self, browser_id: impl Into<String>, sessions: usize) -> Self {
        self.limits
            .insert(browser_id.into(), Arc::new(Semaphore::new(sessions.max(1))));
        self
    }
}

impl Default for LocalPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserPool for LocalPool {
    async fn acquire(&self, browser_id: &str) -> Result<Session, PoolError> {
        let semaphore = self
            .limits
            .get(browser_id)
            .ok_or_else(|| PoolError::UnknownBrowser(browser_id.to_string()))?
            .clone();

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed(browser_id.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Acquired session {} for {} ({} left)",
            id,
            browser_id,
            semaphore.available_permits()
        );

        Ok(Session::new(
            SessionInfo {
                id,
                browser_id: browser_id.to_string(),
                started_at: Utc::now(),
            },
            Some(permit),
        ))
    }

    async fn release(&self, session: Session) -> Result<(), PoolError> {
        if !self.limits.contains_key(session.browser_id()) {
            return Err(PoolError::Release {
                id: session.id(),
                browser_id: session.browser_id().to_string(),
                reason: "session was not handed out by this pool".to_string(),
            });
        }
        debug!("Released session {} for {}", session.id(), session.browser_id());
        drop(session);
        Ok(())
    }
}
