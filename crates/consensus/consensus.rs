//! Consensus engines: Ethash proof-of-work and Clique proof-of-authority.
//!
//! Both engines validate headers against a [`ChainConfig`] obtained from the
//! chain reader, so one binary can serve multiple networks. The importer
//! drives them through the [`engine::Engine`] trait.
//!
//! [`ChainConfig`]: polyeth_common::config::ChainConfig

pub mod clique;
pub mod dao;
pub mod eip1559;
pub mod engine;
pub mod error;
pub mod ethash;
pub mod rewards;

pub use engine::{ChainHeaderReader, Engine, State};
pub use error::ConsensusError;
