//! Process-wide pool of authenticated SSH sessions
//!
//! Each target gets at most one handshake in flight. Concurrent acquirers
//! share the in-progress handshake and observe its outcome. Successful
//! sessions are reused until [`ConnectionPool::close`]; failed handshakes
//! are forgotten so a later acquire retries.

use crate::error::{KeelError, KeelResult};
use crate::ssh::auth::AuthProviders;
use crate::ssh::session::{SessionConnector, SshSession};
use crate::ssh::SshTarget;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cloneable outcome of a failed handshake
#[derive(Debug, Clone)]
enum HandshakeFailure {
    Auth(String),
    Transport(String),
}

impl HandshakeFailure {
    fn from_error(err: KeelError) -> Self {
        match err {
            KeelError::Auth { reason, .. } => Self::Auth(reason),
            KeelError::Transport { reason, .. } => Self::Transport(reason),
            other => Self::Transport(other.to_string()),
        }
    }

    fn into_error(self, target: &SshTarget) -> KeelError {
        match self {
            Self::Auth(reason) => KeelError::Auth {
                host: target.to_string(),
                reason,
            },
            Self::Transport(reason) => KeelError::Transport {
                host: target.to_string(),
                reason,
            },
        }
    }
}

/// How long `close` waits for a handshake still in flight
const CLOSE_GRACE: Duration = Duration::from_secs(30);

type Handshake = Shared<BoxFuture<'static, Result<Arc<SshSession>, HandshakeFailure>>>;

#[derive(Default)]
struct PoolState {
    closed: bool,
    sessions: HashMap<SshTarget, Handshake>,
}

/// Keyed reuse of SSH sessions
pub struct ConnectionPool {
    state: Mutex<PoolState>,
    connector: Arc<dyn SessionConnector>,
    auth: Arc<AuthProviders>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn SessionConnector>, auth: Arc<AuthProviders>) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            connector,
            auth,
        }
    }

    /// Get the session for `target`, performing the handshake on first use.
    ///
    /// `deadline` bounds how long this caller waits; the handshake itself
    /// keeps running for other waiters.
    pub async fn acquire(
        &self,
        target: &SshTarget,
        deadline: Option<Instant>,
    ) -> KeelResult<Arc<SshSession>> {
        let handshake = {
            let mut state = self.lock_state()?;
            if state.closed {
                return Err(KeelError::PoolClosed);
            }
            state
                .sessions
                .entry(target.clone())
                .or_insert_with(|| self.start_handshake(target))
                .clone()
        };

        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, handshake.clone())
                .await
                .map_err(|_| KeelError::timeout(format!("ssh handshake with {}", target)))?,
            None => handshake.clone().await,
        };

        match outcome {
            // `close` drained this handshake and owns its teardown.
            Ok(_) if self.is_closed() => Err(KeelError::PoolClosed),
            Ok(session) => Ok(session),
            Err(failure) => {
                self.forget(target, &handshake);
                Err(failure.into_error(target))
            }
        }
    }

    /// Release every session. Later acquires fail with `PoolClosed`.
    ///
    /// Handshakes still in flight are awaited (up to a grace period) and
    /// torn down once they complete.
    pub async fn close(&self) -> KeelResult<usize> {
        let sessions: Vec<(SshTarget, Handshake)> = {
            let mut state = self.lock_state()?;
            state.closed = true;
            state.sessions.drain().collect()
        };

        let mut closed = 0;
        for (target, handshake) in sessions {
            let session = match handshake.peek() {
                Some(Ok(session)) => Arc::clone(session),
                Some(Err(_)) => continue,
                None => match tokio::time::timeout(CLOSE_GRACE, handshake.clone()).await {
                    Ok(Ok(session)) => session,
                    Ok(Err(_)) => continue,
                    Err(_) => {
                        warn!(
                            "Handshake with {} still running at close; abandoning it",
                            target
                        );
                        continue;
                    }
                },
            };
            if let Err(e) = self.connector.disconnect(&session).await {
                warn!("Failed to close session for {}: {}", session.target(), e);
            }
            closed += 1;
        }

        debug!("Closed {} ssh session(s)", closed);
        Ok(closed)
    }

    /// Number of targets with a session or handshake in flight
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    fn start_handshake(&self, target: &SshTarget) -> Handshake {
        let connector = Arc::clone(&self.connector);
        let auth = Arc::clone(&self.auth);
        let target = target.clone();

        // Spawned so the handshake progresses even if every waiter gives up.
        let task = tokio::spawn(async move {
            debug!("Starting handshake for {}", target);
            let creds = auth.credentials(&target).await?;
            connector.connect(&target, &creds).await
        });

        async move {
            match task.await {
                Ok(Ok(session)) => Ok(Arc::new(session)),
                Ok(Err(e)) => Err(HandshakeFailure::from_error(e)),
                Err(e) => Err(HandshakeFailure::Transport(format!(
                    "handshake task failed: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared()
    }

    /// Drop a failed handshake, unless a newer one already replaced it
    fn forget(&self, target: &SshTarget, failed: &Handshake) {
        if let Ok(mut state) = self.state.lock() {
            if state
                .sessions
                .get(target)
                .is_some_and(|current| current.ptr_eq(failed))
            {
                state.sessions.remove(target);
            }
        }
    }

    fn lock_state(&self) -> KeelResult<std::sync::MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| KeelError::Internal("connection pool lock poisoned".to_string()))
    }
}
