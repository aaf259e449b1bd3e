//! The seam between the lifecycle manager and the wire protocol.

use crate::error::ConnectionError;
use crate::event::{GatewayEvent, SessionToken};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// A live, authenticated session.
#[derive(Debug)]
pub struct GatewaySession {
    pub events: mpsc::Receiver<GatewayEvent>,
    closer: Option<oneshot::Sender<()>>,
}

impl GatewaySession {
    #[must_use]
    pub fn new(events: mpsc::Receiver<GatewayEvent>) -> Self {
        Self {
            events,
            closer: None,
        }
    }

    /// Attach a signal the transport listens on to close the socket.
    #[must_use]
    pub fn with_closer(mut self, closer: oneshot::Sender<()>) -> Self {
        self.closer = Some(closer);
        self
    }

    /// Ask the transport to close the connection.
    pub fn close(mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
        }
    }
}

/// Opens authenticated sessions.
///
/// `connect` returns once credentials have been sent and accepted at the
/// transport level. The ready signal arrives afterwards as
/// [`GatewayEvent::Ready`] (or [`GatewayEvent::Resumed`] when `resume` was
/// honoured).
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self, resume: Option<SessionToken>) -> Result<GatewaySession, ConnectionError>;
}
