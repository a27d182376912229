//! Single-input, multi-output byte stream relay.
//!
//! ```text
//!                        ┌─► BoundedQueue ─► OutputDriver ─► sink
//! source ─► InputDriver ─┼─► BoundedQueue ─► OutputDriver ─► sink
//!                        └─► BoundedQueue ─► OutputDriver ─► sink
//!
//!   SignalBridge ──► Interrupt (every blocking wait)
//!   every driver ──► TerminationRegistry ──► Supervisor ──► exit code
//! ```
//!
//! Each output owns its queue, so a slow destination only loses its own
//! chunks.

pub mod endpoint;
pub mod error;
pub mod input;
pub mod net;
pub mod output;
pub mod queue;
pub mod registry;
pub mod signal;
pub mod supervisor;

pub use endpoint::{
    Direction, EndpointConfig, EndpointKind, ExitStatus, Protocol, RetryPolicy, StreamConfig,
};
pub use error::StreamError;
pub use queue::{BoundedQueue, Chunk, QueueError};
pub use signal::{Signal, SignalBridge};
pub use supervisor::{RunReport, Supervisor, SupervisorOptions};
