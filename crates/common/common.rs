pub use ethereum_types::*;
pub mod config;
pub mod constants;
pub mod numeric;
pub mod serde_utils;
pub mod types;
pub use bytes::Bytes;
