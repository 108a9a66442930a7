//! The dispatch engine: broadcast fan-out and targeted sends.
//!
//! Both operations resolve sessions through the [`Registry`] and delegate the
//! actual delivery to each session's own `send`.  The engine adds exactly two
//! things: ordered selection (broadcast walks the registry in registration
//! order, optionally filtered by a name pattern) and the join policy (all
//! successes in order, or the first observed failure).

use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use peerwire_core::{Delivery, Payload, SendError, SendOptions};

use crate::application::registry::{Registry, SessionRef};

/// Error type for dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The broadcast filter is not a valid pattern.  Raised before any send
    /// is issued.
    #[error("invalid broadcast filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    /// The targeted-send identifier resolved to no registered session; no
    /// send was attempted.
    #[error("no session matches {0}")]
    NotConnected(SessionRef),

    /// A delegated send failed.  Carries the session's own error unmodified.
    #[error(transparent)]
    Send(#[from] SendError),

    /// A broadcast send task was cancelled or panicked before settling.
    #[error("broadcast send task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Options for one broadcast.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    /// Forwarded verbatim to every selected session.
    pub send: SendOptions,
    /// Name pattern selecting the recipients; `None` selects every session.
    pub filter: Option<String>,
}

impl BroadcastOptions {
    /// Options selecting every session whose name matches `pattern`.
    pub fn filtered(pattern: impl Into<String>) -> Self {
        Self {
            send: SendOptions::default(),
            filter: Some(pattern.into()),
        }
    }
}

/// Fan-out and targeted-send engine over a shared [`Registry`].
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Sends `payload` to every session selected by `options.filter`, in
    /// registration order.
    ///
    /// Resolves with the per-session deliveries in selection order once all
    /// sends settle.  An empty selection resolves immediately with an empty
    /// list.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidFilter`] for a malformed pattern, before any
    ///   send is issued.
    /// - The first observed send failure, via [`DispatchError::Send`].  The
    ///   remaining in-flight sends are left to run to completion; they are
    ///   never cancelled on a sibling's failure.
    pub async fn broadcast(
        &self,
        payload: Payload,
        options: BroadcastOptions,
    ) -> Result<Vec<Delivery>, DispatchError> {
        let filter = match &options.filter {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };

        let selected: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|(name, _)| filter.as_ref().map_or(true, |re| re.is_match(name)))
            .collect();
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        // One task per recipient: sends are issued in selection order but a
        // slow peer never stalls its siblings.
        let tasks: Vec<JoinHandle<Result<Delivery, SendError>>> = selected
            .into_iter()
            .map(|(name, session)| {
                let payload = payload.clone();
                let send = options.send;
                tokio::spawn(async move {
                    let result = session.send(payload, send).await;
                    if let Err(e) = &result {
                        warn!("broadcast send to {name:?} failed: {e}");
                    }
                    result
                })
            })
            .collect();

        // Join in selection order.  Returning on the first failure drops the
        // remaining handles, which detaches those tasks rather than aborting
        // them.
        let mut deliveries = Vec::with_capacity(tasks.len());
        for task in tasks {
            deliveries.push(task.await??);
        }
        Ok(deliveries)
    }

    /// Sends `payload` to the single session identified by `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotConnected`] when `target` resolves to no
    /// session (nothing is sent), or the session's own failure unmodified.
    pub async fn send_to(
        &self,
        target: impl Into<SessionRef>,
        payload: Payload,
        options: SendOptions,
    ) -> Result<Delivery, DispatchError> {
        let target = target.into();
        match self.registry.get(&target) {
            Some(session) => Ok(session.send(payload, options).await?),
            None => Err(DispatchError::NotConnected(target)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
