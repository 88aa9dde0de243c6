//! docmill - asynchronous document-to-Markdown conversion service.
//!
//! Clients submit documents over the submission API; blobs land in object
//! storage, conversion work goes onto a durable SQLite-backed queue, and a
//! pool of workers performs OCR through an external provider, recording
//! Markdown output and usage.

pub mod blobs;
pub mod cli;
pub mod config;
pub mod engine;
pub mod models;
pub mod ocr;
pub mod server;
pub mod store;
