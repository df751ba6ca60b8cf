//! Chain configuration behind a per-feature capability interface.
//!
//! Two schema dialects describe the same information: the fork-name keyed
//! [`ForkConfig`] used by upstream chainspecs, and the feature-granular
//! [`FeatureConfig`] keyed by individual EIP/ECIP activations. The
//! [`ChainConfig`] trait erases the difference; consensus code only ever
//! asks "at which block (or time) does feature X activate".

mod compat;
mod convert;
mod fork;
mod granular;

pub use compat::{ConfigCompatError, compatible, equivalent, forks};
pub use convert::{ConvertError, FeatureDescriptor, FeatureKind, FEATURES, convert};
pub use fork::{CliqueParams, ForkConfig};
pub use granular::FeatureConfig;

use ethereum_types::U256;
use thiserror::Error;

use crate::constants::{DURATION_LIMIT, MINIMUM_DIFFICULTY};
use crate::numeric::{U64HexMap, U64HexValOrMap};

/// Outcome of a capability setter the schema cannot represent.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SetError {
    /// The schema has no slot for the feature, but the value is a default
    /// and may be dropped without changing meaning.
    #[error("unsupported feature, default value dropped")]
    UnsupportedNoop,
    /// The schema cannot represent a non-default value.
    #[error("unsupported feature with non-default value")]
    UnsupportedFatal,
}

/// True when a block-activated feature is live at `head`.
pub fn is_enabled(transition: Option<u64>, head: u64) -> bool {
    transition.is_some_and(|t| t <= head)
}

/// True when a time-activated feature is live at `timestamp`.
pub fn is_enabled_by_time(transition: Option<u64>, timestamp: u64) -> bool {
    transition.is_some_and(|t| t <= timestamp)
}

/// Capability interface over every schema dialect.
///
/// Accessors come in get/set pairs. `None` means "never activates";
/// `Some(n)` means "active at block number (or timestamp) >= n". Setters
/// report [`SetError`] when their schema cannot hold the value.
pub trait ChainConfig {
    // --- EVM / protocol features (block-activated) ---
    fn get_eip2_transition(&self) -> Option<u64>;
    fn set_eip2_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip7_transition(&self) -> Option<u64>;
    fn set_eip7_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip150_transition(&self) -> Option<u64>;
    fn set_eip150_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip155_transition(&self) -> Option<u64>;
    fn set_eip155_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip160_transition(&self) -> Option<u64>;
    fn set_eip160_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip161_transition(&self) -> Option<u64>;
    fn set_eip161_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- Difficulty rule selectors ---
    fn get_eip100b_transition(&self) -> Option<u64>;
    fn set_eip100b_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- Schedule-inferred bomb delays / reward drops ---
    fn get_eip649_transition(&self) -> Option<u64>;
    fn set_eip649_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip1234_transition(&self) -> Option<u64>;
    fn set_eip1234_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip2384_transition(&self) -> Option<u64>;
    fn set_eip2384_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip3554_transition(&self) -> Option<u64>;
    fn set_eip3554_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip4345_transition(&self) -> Option<u64>;
    fn set_eip4345_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip5133_transition(&self) -> Option<u64>;
    fn set_eip5133_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- DAO fork ---
    fn get_eip779_transition(&self) -> Option<u64>;
    fn set_eip779_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- Fee market & post-merge optional header fields ---
    fn get_eip1559_transition(&self) -> Option<u64>;
    fn set_eip1559_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip4895_transition(&self) -> Option<u64>;
    fn set_eip4895_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip4895_transition_time(&self) -> Option<u64>;
    fn set_eip4895_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip4844_transition_time(&self) -> Option<u64>;
    fn set_eip4844_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_eip4788_transition_time(&self) -> Option<u64>;
    fn set_eip4788_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- Classic-chain features ---
    fn get_ecip1010_pause_transition(&self) -> Option<u64>;
    fn set_ecip1010_pause_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_ecip1010_continue_transition(&self) -> Option<u64>;
    fn set_ecip1010_continue_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_ecip1017_transition(&self) -> Option<u64>;
    fn set_ecip1017_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_ecip1017_era_rounds(&self) -> Option<u64>;
    fn set_ecip1017_era_rounds(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_ecip1041_transition(&self) -> Option<u64>;
    fn set_ecip1041_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_ecip1099_transition(&self) -> Option<u64>;
    fn set_ecip1099_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_ecbp1100_transition(&self) -> Option<u64>;
    fn set_ecbp1100_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- Musicoin features ---
    fn get_mcip3_transition(&self) -> Option<u64>;
    fn set_mcip3_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;
    fn get_mcip8_transition(&self) -> Option<u64>;
    fn set_mcip8_transition(&mut self, v: Option<u64>) -> Result<(), SetError>;

    // --- Schedules ---
    fn get_difficulty_bomb_delays(&self) -> U64HexMap;
    fn set_difficulty_bomb_delays(&mut self, v: U64HexMap) -> Result<(), SetError>;
    fn get_block_rewards(&self) -> U64HexValOrMap;
    fn set_block_rewards(&mut self, v: U64HexValOrMap) -> Result<(), SetError>;

    // --- Engine parameters ---
    fn is_ethash(&self) -> bool;
    fn clique_params(&self) -> Option<CliqueParams>;

    /// Floor for the difficulty adjustment. Chains rarely override this.
    fn minimum_difficulty(&self) -> U256 {
        U256::from(MINIMUM_DIFFICULTY)
    }

    /// Frontier fast/slow block boundary in seconds.
    fn duration_limit(&self) -> u64 {
        DURATION_LIMIT
    }

    // --- Convenience queries used by the consensus engines ---

    fn is_enabled(&self, transition: fn(&Self) -> Option<u64>, head: u64) -> bool
    where
        Self: Sized,
    {
        is_enabled(transition(self), head)
    }

    /// Cumulative difficulty-bomb delay at block `n`: the sum of all
    /// schedule entries with key <= `n`.
    fn bomb_delay_sum(&self, n: u64) -> U256 {
        schedule_sum_until(&self.get_difficulty_bomb_delays().0, n)
    }

    /// Base block reward at block `n`: the value of the largest schedule
    /// key <= `n`, or zero when the schedule is empty.
    fn block_reward_at(&self, n: u64) -> U256 {
        schedule_value_at(&self.get_block_rewards().0, n).unwrap_or_default()
    }

    /// Ethash epoch length at block `n` (doubles at the ECIP-1099 block).
    fn epoch_length_at(&self, n: u64) -> u64 {
        if is_enabled(self.get_ecip1099_transition(), n) {
            60_000
        } else {
            30_000
        }
    }
}

use std::collections::BTreeMap;

/// Sum of all schedule entries with key <= `n`.
pub fn schedule_sum_until(entries: &BTreeMap<u64, U256>, n: u64) -> U256 {
    entries
        .range(..=n)
        .fold(U256::zero(), |acc, (_, v)| acc.saturating_add(*v))
}

/// Value of the largest schedule key <= `n`.
pub fn schedule_value_at(entries: &BTreeMap<u64, U256>, n: u64) -> Option<U256> {
    entries.range(..=n).next_back().map(|(_, v)| *v)
}

/// Writes `total` as the cumulative value at `height`: the entry stored is
/// the difference between `total` and the sum of all earlier entries, so
/// summing entries up to `height` afterwards yields exactly `total`.
/// Entries at or above `height` are dropped first; they would double count.
pub fn schedule_set_total_for_height(entries: &mut BTreeMap<u64, U256>, height: u64, total: U256) {
    entries.retain(|k, _| *k < height);
    let prior = schedule_sum_until(entries, height);
    let delta = total.saturating_sub(prior);
    if !delta.is_zero() {
        entries.insert(height, delta);
    }
}
