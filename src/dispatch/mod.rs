//! Inbound message dispatch.
//!
//! ```text
//! transport delivery thread
//!        │ handle_raw(topic, bytes)
//!        ▼
//! ┌──────────────────────┐   responses   ┌───────────────────┐
//! │  CallbackDispatcher  │──────────────▶│ RequestCorrelator │
//! │  decode + match      │               └───────────────────┘
//! └──────────────────────┘
//!        │ one job per message, keyed by topic
//!        ▼
//! ┌──────────────────────┐
//! │      WorkerPool      │  N workers, bounded queue each
//! └──────────────────────┘
//! ```
//!
//! Callbacks for one topic run in arrival order; callbacks for different
//! topics may run concurrently.

mod callback;
mod dispatcher;
pub(crate) mod pool;

pub use callback::{CallbackId, MessageCallback};
pub use dispatcher::{CallbackDispatcher, DispatchStats};
pub use pool::PoolStats;
