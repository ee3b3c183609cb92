//! Events delivered to per-connection handlers from other components.

/// An asynchronous input to a session, as opposed to a wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Periodic admission-queue position update.
    QueuePosition(usize),
    /// The head of the queue got a slot; the session may proceed to
    /// the character list.
    QueueSlotFree,
    /// Broadcast notice, e.g. an impending shutdown.
    Broadcast(String),
}
