//! Pass-through buffer that keeps nothing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::Buffer;
use crate::error::SendError;
use crate::protocol::{AgentResponse, RequestPayload, ServerResponse};
use crate::sender::{Sender, SenderSlot};

/// Forwards to the attached sender and drops messages while there is none.
#[derive(Default)]
pub struct Dummy {
    sender: SenderSlot,
}

impl Dummy {
    /// Create a buffer with no sender attached.
    pub fn new() -> Self {
        Self::default()
    }

    fn release(&self, sender: &Arc<dyn Sender>, err: &SendError) {
        if err.is_transport() && self.sender.clear_if(sender) {
            tracing::debug!("Sender released: {}", err);
        }
    }
}

#[async_trait]
impl Buffer for Dummy {
    async fn send(&self, response: AgentResponse) -> Result<(), SendError> {
        let Some(sender) = self.sender.load() else {
            tracing::debug!("No sender, dropping response {}", response.id);
            return Ok(());
        };
        let result = sender.send(response).await;
        if let Err(err) = &result {
            self.release(&sender, err);
        }
        result
    }

    async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError> {
        let Some(sender) = self.sender.load() else {
            return Ok(ServerResponse::Queued);
        };
        let result = sender.send_and_wait(request).await;
        if let Err(err) = &result {
            self.release(&sender, err);
        }
        result
    }

    fn set_sender(&self, sender: Arc<dyn Sender>) {
        self.sender.store(sender);
    }

    async fn close(&self) {}
}
