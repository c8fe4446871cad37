// Core modules: wire codecs, column marshaling, the read state machine and the session pool.
pub mod client;
pub mod codec;
pub mod error;
pub mod memory;
pub mod operation;
pub mod pool;
pub mod request;
pub mod response;
pub mod schema;
pub mod text;
pub mod wire;
