//! Purpose: Primary-key read data-access layer behind a database REST gateway.
//! Exports: `api` (entry points and public types), `core` (codecs, operations, pool), `fixture`.
//! Role: Library backing the `rdrs-dal` developer binary and an embedding REST layer.
//! Invariants: Request and response buffers keep a fixed little-endian layout shared with the REST layer.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state; there is no global pool.
pub mod api;
pub mod core;
pub mod fixture;
