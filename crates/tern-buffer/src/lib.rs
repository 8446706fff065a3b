//! Buffer pool manager for TernDB.
//!
//! Serves fixed-size pages out of a bounded frame array with pin counting
//! and dirty tracking. Pages stay resident until freed; when every frame
//! is occupied, allocation surfaces an error to the caller.

mod frame;
mod pool;

pub use frame::FrameId;
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PageGuard};
