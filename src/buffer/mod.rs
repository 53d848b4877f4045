//! Outgoing message buffering.
//!
//! A [`Buffer`] sits between the agent's producers and the transport. While a
//! sender is attached messages go straight through; otherwise they are kept
//! on disk ([`Cache`]) or dropped ([`Dummy`]) depending on configuration.

mod cache;
mod dummy;
mod ring;

use std::sync::Arc;

use async_trait::async_trait;

pub use cache::Cache;
pub use dummy::Dummy;
pub use ring::{Ring, RingStats};

use crate::config::BufferConfig;
use crate::error::{BufferError, SendError};
use crate::protocol::{AgentResponse, RequestPayload, ServerResponse};
use crate::sender::Sender;

/// What producers talk to instead of the transport.
#[async_trait]
pub trait Buffer: Send + Sync {
    /// Deliver or keep a response.
    async fn send(&self, response: AgentResponse) -> Result<(), SendError>;

    /// Deliver a request and return the server's reply, or keep it and
    /// return [`ServerResponse::Queued`].
    async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError>;

    /// Attach the sender of a freshly established connection.
    fn set_sender(&self, sender: Arc<dyn Sender>);

    /// Stop background work and release files.
    async fn close(&self);
}

/// Build the buffer described by `config`.
pub fn open_buffer(config: &BufferConfig) -> Result<Arc<dyn Buffer>, BufferError> {
    if !config.enabled {
        tracing::info!("Outbox disabled, messages sent while disconnected are dropped");
        return Ok(Arc::new(Dummy::new()));
    }
    Ok(Arc::new(Cache::from_config(config)?))
}
