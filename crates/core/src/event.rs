use chrono::{DateTime, Utc};

/// A domain event emitted by an aggregate.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - named with a stable dotted identifier (e.g. "cart.line.added")
/// - timestamped with business time
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier.
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
