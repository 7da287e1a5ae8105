//! Event primitives shared by the ledger and the workflow aggregates.

pub mod envelope;
pub mod event;
pub mod handler;
pub mod projection;
pub mod runner;
pub mod tenant;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use projection::Projection;
pub use runner::{ProjectionCursor, ProjectionError, ProjectionRunner};
pub use tenant::CompanyScoped;
