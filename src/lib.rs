//! Durable outbox for agent-to-server messages.
//!
//! Producers hand messages to a [`Buffer`]. While a connection is up they go
//! straight to its [`Sender`]; while it is down they wait on disk in one
//! bounded FIFO per [`Priority`] class and are replayed in order once a new
//! sender is attached. When a queue outgrows its capacity the oldest entries
//! are dropped first.

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod sender;
pub mod signal;
pub mod store;

pub use buffer::{Buffer, Cache, Dummy, Ring, RingStats, open_buffer};
pub use config::{BufferConfig, RingOptions};
pub use error::{BufferError, ConfigError, SendError, StoreError};
pub use protocol::{AgentResponse, Priority, RequestPayload, ServerResponse};
pub use sender::Sender;
