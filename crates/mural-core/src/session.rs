//! Session setup for agent identities
//!
//! Acquiring credentials is an external concern. The dispatcher only asks a
//! provider to establish a session for each identity at startup and to
//! re-establish one after a transport failure.

use crate::error::{SessionError, TransportError};
use crate::roster::AgentIdentity;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Establishes and refreshes agent sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Set up a session, storing any acquired credentials on `identity`
    async fn establish(&self, identity: &mut AgentIdentity) -> Result<(), SessionError>;

    /// Refresh the session of a running agent after a transport failure
    async fn reestablish(&self, _identity: &AgentIdentity) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Provider for transports that need no session setup
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSessions;

#[async_trait]
impl SessionProvider for NoopSessions {
    async fn establish(&self, _identity: &mut AgentIdentity) -> Result<(), SessionError> {
        Ok(())
    }
}

/// A collaborator that only one caller may use at a time
///
/// Acquiring waits until the current holder drops its guard.
#[derive(Debug, Clone)]
pub struct SharedResource {
    permits: Arc<Semaphore>,
}

impl SharedResource {
    /// Create an unheld resource
    #[must_use]
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait until the resource is released, then hold it
    ///
    /// # Errors
    /// `SessionError::Transport` if the resource was closed
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SessionError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Transport(TransportError::Closed))
    }

    /// Whether someone holds the resource
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for SharedResource {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes every call of the wrapped provider
///
/// For providers backed by something that cannot be driven concurrently,
/// such as a single browser instance.
pub struct ExclusiveSessions<P> {
    inner: P,
    resource: SharedResource,
}

impl<P: SessionProvider> ExclusiveSessions<P> {
    /// Wrap `inner`
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            resource: SharedResource::new(),
        }
    }

    /// Guard shared with the wrapped provider
    #[must_use]
    pub fn resource(&self) -> &SharedResource {
        &self.resource
    }
}

#[async_trait]
impl<P: SessionProvider> SessionProvider for ExclusiveSessions<P> {
    async fn establish(&self, identity: &mut AgentIdentity) -> Result<(), SessionError> {
        let _guard = self.resource.acquire().await?;
        self.inner.establish(identity).await
    }

    async fn reestablish(&self, identity: &AgentIdentity) -> Result<(), SessionError> {
        let _guard = self.resource.acquire().await?;
        self.inner.reestablish(identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SessionProvider for Counting {
        async fn establish(&self, identity: &mut AgentIdentity) -> Result<(), SessionError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            identity.access_token = Some(format!("token-{}", identity.username));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shared_resource_waits_for_release() {
        let resource = SharedResource::new();
        let guard = resource.acquire().await.unwrap();
        assert!(resource.is_held());

        let waiter = {
            let resource = resource.clone();
            tokio::spawn(async move { resource.acquire().await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
        assert!(!resource.is_held());
    }

    #[tokio::test]
    async fn test_exclusive_sessions_never_overlap() {
        let sessions = Arc::new(ExclusiveSessions::new(Counting {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }));

        let mut handles = Vec::new();
        for i in 0..4 {
            let sessions = Arc::clone(&sessions);
            handles.push(tokio::spawn(async move {
                let mut identity = AgentIdentity::new(format!("agent-{i}"));
                sessions.establish(&mut identity).await.unwrap();
                identity
            }));
        }
        for handle in handles {
            let identity = handle.await.unwrap();
            assert!(identity.has_session());
        }
        assert_eq!(sessions.inner.peak.load(Ordering::SeqCst), 1);
    }
}
