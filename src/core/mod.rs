// Core modules: blob codec, zero-copy reads, in-place mutation, and the shared segment.
pub mod catalog;
pub mod decode;
pub mod encode;
pub mod error;
pub mod format;
pub mod frame;
pub mod mutate;
pub mod query;
pub mod segment;
pub mod table;
pub mod validate;
