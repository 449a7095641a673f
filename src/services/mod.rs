//! Service layer: the metadata registry (the part with invariants to
//! protect), the on-disk blob store, and the relay facade that wires them
//! together for the HTTP handlers.

pub mod blob_store;
pub mod registry;
pub mod relay_service;
