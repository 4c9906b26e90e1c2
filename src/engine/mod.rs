//! Per-device execution fabric: ordered command streams, completion
//! events, device-side buffers, and the memory arena each device draws
//! its tiles from.
//!
//! Every registered device gets exactly one stream. Commands submitted
//! to a stream run in submission order; the only cross-stream ordering
//! primitive is a recorded [`CompletionEvent`] that another stream (or
//! the host) waits on.

pub mod arena;
pub mod buffer;
pub mod event;
pub mod stream;

pub use arena::DeviceArena;
pub use buffer::DeviceBuffer;
pub use event::CompletionEvent;
pub use stream::DeviceStream;
