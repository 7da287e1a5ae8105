//! Company-isolated storage for workflow documents.

pub mod documents;

pub use documents::DocumentStore;
