//! Batch alt-text generation engine.
//!
//! The engine walks a media library in cursor-ordered slices, filters items
//! through an eligibility policy, submits eligible images to a metered
//! annotation API with bounded retries, and fans generated text out to
//! derivative copies exactly once per run. All traversal state lives in the
//! request/response cycle so the server side stays stateless; the client
//! driver checkpoints a resumable session after every batch.

pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod eligibility;
pub mod enrichment;
pub mod keywords;
pub mod models;
pub mod repository;
pub mod server;
