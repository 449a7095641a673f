//! Core data model for the file-relay service.
//!
//! A single entity: the metadata record tracking one uploaded file's
//! lifetime and download quota. It serializes naturally as JSON via `serde`
//! for the info endpoint; the on-disk payload path stays internal.

pub mod file_entry;
