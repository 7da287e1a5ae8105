use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Read models are **disposable**: they can be dropped and rebuilt from the
/// stream at any time. The stream is the source of truth.
///
/// `apply` must be deterministic so that replaying the same history twice yields
/// the same read model. Ordering and duplicate detection are enforced by
/// `ProjectionRunner`, not by implementations.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    ///
    /// Events not relevant to this projection are ignored.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
