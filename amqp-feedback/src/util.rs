//! Common utilities

/// Whether an event loop should keep running after handling a frame
pub(crate) enum Running {
    /// Continue the loop
    Continue,

    /// Stop the loop
    Stop,
}
