//! Two rings, one per priority class, behind a single [`Buffer`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::{Buffer, Ring};
use crate::config::{BufferConfig, RingOptions};
use crate::error::{BufferError, SendError};
use crate::protocol::{AgentResponse, Priority, RequestPayload, ServerResponse};
use crate::sender::Sender;

/// Durable buffer routing each message to the ring of its priority class.
///
/// The rings share nothing: a full unprioritized ring never evicts
/// prioritized entries, and each drains in its own order.
pub struct Cache {
    prioritized: Ring,
    unprioritized: Ring,
}

impl Cache {
    /// Open both rings below `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        prioritized: RingOptions,
        unprioritized: RingOptions,
    ) -> Result<Self, BufferError> {
        let dir = dir.as_ref();
        let prioritized = Ring::open(dir.join(Priority::Prioritized.name()), prioritized)?;
        let unprioritized = match Ring::open(dir.join(Priority::Unprioritized.name()), unprioritized)
        {
            Ok(ring) => ring,
            Err(e) => {
                tokio::spawn(async move { prioritized.close().await });
                return Err(e);
            }
        };
        Ok(Self {
            prioritized,
            unprioritized,
        })
    }

    /// Open both rings as configured.
    pub fn from_config(config: &BufferConfig) -> Result<Self, BufferError> {
        Self::open(
            &config.dir,
            config.ring_options(Priority::Prioritized),
            config.ring_options(Priority::Unprioritized),
        )
    }

    /// The ring holding messages of `priority`.
    pub fn ring(&self, priority: Priority) -> &Ring {
        match priority {
            Priority::Prioritized => &self.prioritized,
            Priority::Unprioritized => &self.unprioritized,
        }
    }
}

#[async_trait]
impl Buffer for Cache {
    async fn send(&self, response: AgentResponse) -> Result<(), SendError> {
        self.ring(response.payload.priority()).send(response).await
    }

    async fn send_and_wait(&self, request: RequestPayload) -> Result<ServerResponse, SendError> {
        match request.priority() {
            Some(priority) => self.ring(priority).send_and_wait(request).await,
            None => {
                tracing::debug!("Not buffering unclassified request {:?}", request);
                Ok(ServerResponse::Queued)
            }
        }
    }

    fn set_sender(&self, sender: Arc<dyn Sender>) {
        self.prioritized.set_sender(Arc::clone(&sender));
        self.unprioritized.set_sender(sender);
    }

    async fn close(&self) {
        tokio::join!(self.prioritized.close(), self.unprioritized.close());
    }
}
