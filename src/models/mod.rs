//! Core data models for the file gateway.
//!
//! `FileRecord` is the durable unit of truth for every stored object. It maps
//! cleanly to the `files` table via `sqlx::FromRow` and serializes naturally
//! as JSON via `serde`.

pub mod file_record;
