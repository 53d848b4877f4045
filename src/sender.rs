//! The capability that actually delivers messages to the server.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::SendError;
use crate::protocol::{AgentResponse, RequestPayload, ServerResponse};

/// Delivers messages to the remote side right now.
///
/// Implemented by the transport. A [`SendError::ConnectionLost`] tells the
/// caller the connection is unusable and the message was not delivered.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send a response to a server request.
    async fn send(&self, response: AgentResponse) -> Result<(), SendError>;

    /// Send a request and wait for the server's reply.
    async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError>;
}

/// Optional, atomically replaceable reference to the current sender.
#[derive(Default)]
pub struct SenderSlot {
    current: RwLock<Option<Arc<dyn Sender>>>,
}

impl SenderSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached sender, if any.
    pub fn load(&self) -> Option<Arc<dyn Sender>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Attach a sender, replacing any previous one.
    pub fn store(&self, sender: Arc<dyn Sender>) {
        match self.current.write() {
            Ok(mut guard) => *guard = Some(sender),
            Err(poisoned) => *poisoned.into_inner() = Some(sender),
        }
    }

    /// Detach `failed` if it is still the attached sender.
    ///
    /// Returns false when another sender was attached in the meantime, in which
    /// case the slot is left alone.
    pub fn clear_if(&self, failed: &Arc<dyn Sender>) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(current) if same_sender(current, failed) => {
                *guard = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.load().is_some()
    }
}

/// Identity comparison on the data pointer; vtable pointers are not unique.
fn same_sender(a: &Arc<dyn Sender>, b: &Arc<dyn Sender>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
