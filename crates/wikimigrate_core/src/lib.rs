pub mod config;
pub mod convert;
pub mod error;
pub mod migrate;
pub mod replay;
pub mod revision;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod timestamp;
