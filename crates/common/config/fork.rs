use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::constants::{
    EIP649_BLOCK_REWARD, EIP649_BOMB_DELAY, EIP1234_BLOCK_REWARD, EIP1234_BOMB_DELAY,
    EIP2384_BOMB_DELAY, EIP3554_BOMB_DELAY, EIP4345_BOMB_DELAY, EIP5133_BOMB_DELAY,
    FRONTIER_BLOCK_REWARD,
};
use crate::numeric::{U64HexMap, U64HexValOrMap};

use super::{ChainConfig, SetError, schedule_set_total_for_height};

/// Ethash engine marker. The upstream dialect carries an empty object.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EthashParams {}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CliqueParams {
    /// Seconds between blocks.
    pub period: u64,
    /// Checkpoint interval; snapshot headers carry the full signer list
    /// every `epoch` blocks.
    pub epoch: u64,
}

impl Default for CliqueParams {
    fn default() -> CliqueParams {
        CliqueParams {
            period: 15,
            epoch: 30_000,
        }
    }
}

/// The upstream monolithic chain configuration, keyed by hard-fork names.
/// Feature accessors translate fork blocks into per-EIP activations; the
/// bomb-delay and reward schedules are derived, not stored.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ForkConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homestead_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dao_fork_block: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dao_fork_support: bool,
    #[serde(rename = "eip150Block", skip_serializing_if = "Option::is_none")]
    pub eip150_block: Option<u64>,
    #[serde(rename = "eip155Block", skip_serializing_if = "Option::is_none")]
    pub eip155_block: Option<u64>,
    #[serde(rename = "eip158Block", skip_serializing_if = "Option::is_none")]
    pub eip158_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byzantium_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constantinople_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub petersburg_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub istanbul_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muir_glacier_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub berlin_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub london_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrow_glacier_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gray_glacier_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shanghai_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancun_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_total_difficulty: Option<U256>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethash: Option<EthashParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clique: Option<CliqueParams>,
}

/// Setter body for features the monolithic schema cannot hold.
fn unsupported(v: Option<u64>) -> Result<(), SetError> {
    match v {
        None | Some(0) => Err(SetError::UnsupportedNoop),
        Some(_) => Err(SetError::UnsupportedFatal),
    }
}

impl ForkConfig {
    pub fn mainnet() -> ForkConfig {
        ForkConfig {
            chain_id: Some(1),
            homestead_block: Some(1_150_000),
            dao_fork_block: Some(1_920_000),
            dao_fork_support: true,
            eip150_block: Some(2_463_000),
            eip155_block: Some(2_675_000),
            eip158_block: Some(2_675_000),
            byzantium_block: Some(4_370_000),
            constantinople_block: Some(7_280_000),
            petersburg_block: Some(7_280_000),
            istanbul_block: Some(9_069_000),
            muir_glacier_block: Some(9_200_000),
            berlin_block: Some(12_244_000),
            london_block: Some(12_965_000),
            arrow_glacier_block: Some(13_773_000),
            gray_glacier_block: Some(15_050_000),
            shanghai_time: Some(1_681_338_455),
            cancun_time: Some(1_710_338_135),
            ethash: Some(EthashParams::default()),
            ..Default::default()
        }
    }
}

impl ChainConfig for ForkConfig {
    fn get_eip2_transition(&self) -> Option<u64> {
        self.homestead_block
    }
    fn set_eip2_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.homestead_block = v;
        Ok(())
    }
    fn get_eip7_transition(&self) -> Option<u64> {
        self.homestead_block
    }
    fn set_eip7_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        // Homestead bundles EIP-2 and EIP-7; diverging values cannot be
        // represented.
        if v == self.homestead_block {
            Ok(())
        } else if self.homestead_block.is_none() {
            self.homestead_block = v;
            Ok(())
        } else {
            unsupported(v)
        }
    }
    fn get_eip150_transition(&self) -> Option<u64> {
        self.eip150_block
    }
    fn set_eip150_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip150_block = v;
        Ok(())
    }
    fn get_eip155_transition(&self) -> Option<u64> {
        self.eip155_block
    }
    fn set_eip155_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip155_block = v;
        Ok(())
    }
    fn get_eip160_transition(&self) -> Option<u64> {
        self.eip158_block
    }
    fn set_eip160_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip158_block = v;
        Ok(())
    }
    fn get_eip161_transition(&self) -> Option<u64> {
        self.eip158_block
    }
    fn set_eip161_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        if v == self.eip158_block || self.eip158_block.is_none() {
            self.eip158_block = v;
            Ok(())
        } else {
            unsupported(v)
        }
    }

    fn get_eip100b_transition(&self) -> Option<u64> {
        self.byzantium_block
    }
    fn set_eip100b_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.byzantium_block = v;
        Ok(())
    }

    fn get_eip649_transition(&self) -> Option<u64> {
        self.byzantium_block
    }
    fn set_eip649_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        if v == self.byzantium_block || self.byzantium_block.is_none() {
            self.byzantium_block = v;
            Ok(())
        } else {
            unsupported(v)
        }
    }
    fn get_eip1234_transition(&self) -> Option<u64> {
        self.constantinople_block
    }
    fn set_eip1234_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.constantinople_block = v;
        Ok(())
    }
    fn get_eip2384_transition(&self) -> Option<u64> {
        self.muir_glacier_block
    }
    fn set_eip2384_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.muir_glacier_block = v;
        Ok(())
    }
    fn get_eip3554_transition(&self) -> Option<u64> {
        self.london_block
    }
    fn set_eip3554_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        if v == self.london_block || self.london_block.is_none() {
            self.london_block = v;
            Ok(())
        } else {
            unsupported(v)
        }
    }
    fn get_eip4345_transition(&self) -> Option<u64> {
        self.arrow_glacier_block
    }
    fn set_eip4345_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.arrow_glacier_block = v;
        Ok(())
    }
    fn get_eip5133_transition(&self) -> Option<u64> {
        self.gray_glacier_block
    }
    fn set_eip5133_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.gray_glacier_block = v;
        Ok(())
    }

    fn get_eip779_transition(&self) -> Option<u64> {
        if self.dao_fork_support {
            self.dao_fork_block
        } else {
            None
        }
    }
    fn set_eip779_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.dao_fork_support = v.is_some();
        self.dao_fork_block = v;
        Ok(())
    }

    fn get_eip1559_transition(&self) -> Option<u64> {
        self.london_block
    }
    fn set_eip1559_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        if v == self.london_block || self.london_block.is_none() {
            self.london_block = v;
            Ok(())
        } else {
            unsupported(v)
        }
    }
    fn get_eip4895_transition(&self) -> Option<u64> {
        None
    }
    fn set_eip4895_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_eip4895_transition_time(&self) -> Option<u64> {
        self.shanghai_time
    }
    fn set_eip4895_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.shanghai_time = v;
        Ok(())
    }
    fn get_eip4844_transition_time(&self) -> Option<u64> {
        self.cancun_time
    }
    fn set_eip4844_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.cancun_time = v;
        Ok(())
    }
    fn get_eip4788_transition_time(&self) -> Option<u64> {
        self.cancun_time
    }
    fn set_eip4788_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError> {
        if v == self.cancun_time || self.cancun_time.is_none() {
            self.cancun_time = v;
            Ok(())
        } else {
            unsupported(v)
        }
    }

    // The classic-chain features have no upstream slot.
    fn get_ecip1010_pause_transition(&self) -> Option<u64> {
        None
    }
    fn set_ecip1010_pause_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_ecip1010_continue_transition(&self) -> Option<u64> {
        None
    }
    fn set_ecip1010_continue_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_ecip1017_transition(&self) -> Option<u64> {
        None
    }
    fn set_ecip1017_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_ecip1017_era_rounds(&self) -> Option<u64> {
        None
    }
    fn set_ecip1017_era_rounds(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_ecip1041_transition(&self) -> Option<u64> {
        None
    }
    fn set_ecip1041_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_ecip1099_transition(&self) -> Option<u64> {
        None
    }
    fn set_ecip1099_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_ecbp1100_transition(&self) -> Option<u64> {
        None
    }
    fn set_ecbp1100_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_mcip3_transition(&self) -> Option<u64> {
        None
    }
    fn set_mcip3_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }
    fn get_mcip8_transition(&self) -> Option<u64> {
        None
    }
    fn set_mcip8_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        unsupported(v)
    }

    fn get_difficulty_bomb_delays(&self) -> U64HexMap {
        let mut delays = U64HexMap::default();
        let stages = [
            (self.byzantium_block, EIP649_BOMB_DELAY),
            (self.constantinople_block, EIP1234_BOMB_DELAY),
            (self.muir_glacier_block, EIP2384_BOMB_DELAY),
            (self.london_block, EIP3554_BOMB_DELAY),
            (self.arrow_glacier_block, EIP4345_BOMB_DELAY),
            (self.gray_glacier_block, EIP5133_BOMB_DELAY),
        ];
        for (block, total) in stages {
            if let Some(block) = block {
                schedule_set_total_for_height(&mut delays.0, block, U256::from(total));
            }
        }
        delays
    }
    fn set_difficulty_bomb_delays(&mut self, v: U64HexMap) -> Result<(), SetError> {
        // Derived from the fork blocks; only an equal (or empty) schedule
        // can be accepted.
        if v.is_empty() || v == self.get_difficulty_bomb_delays() {
            Ok(())
        } else {
            Err(SetError::UnsupportedFatal)
        }
    }
    fn get_block_rewards(&self) -> U64HexValOrMap {
        let mut rewards = U64HexValOrMap::default();
        rewards.insert(0, U256::from(FRONTIER_BLOCK_REWARD));
        if let Some(block) = self.byzantium_block {
            rewards.insert(block, U256::from(EIP649_BLOCK_REWARD));
        }
        if let Some(block) = self.constantinople_block {
            rewards.insert(block, U256::from(EIP1234_BLOCK_REWARD));
        }
        rewards
    }
    fn set_block_rewards(&mut self, v: U64HexValOrMap) -> Result<(), SetError> {
        if v.is_empty() || v == self.get_block_rewards() {
            Ok(())
        } else {
            Err(SetError::UnsupportedFatal)
        }
    }

    fn is_ethash(&self) -> bool {
        self.ethash.is_some()
    }
    fn clique_params(&self) -> Option<CliqueParams> {
        self.clique.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_blocks_map_to_features() {
        let config = ForkConfig::mainnet();
        assert_eq!(config.get_eip2_transition(), Some(1_150_000));
        assert_eq!(config.get_eip649_transition(), Some(4_370_000));
        assert_eq!(config.get_eip100b_transition(), Some(4_370_000));
        assert_eq!(config.get_eip1234_transition(), Some(7_280_000));
        assert_eq!(config.get_eip2384_transition(), Some(9_200_000));
        assert_eq!(config.get_eip1559_transition(), Some(12_965_000));
        assert_eq!(config.get_eip779_transition(), Some(1_920_000));
        assert_eq!(config.get_eip4895_transition_time(), Some(1_681_338_455));
    }

    #[test]
    fn derived_bomb_schedule_sums_correctly() {
        let config = ForkConfig::mainnet();
        let delays = config.get_difficulty_bomb_delays();
        assert_eq!(delays.get(&4_370_000), Some(&U256::from(3_000_000)));
        assert_eq!(delays.get(&7_280_000), Some(&U256::from(2_000_000)));
        assert_eq!(config.bomb_delay_sum(15_050_000), U256::from(11_400_000));
    }

    #[test]
    fn dao_support_gates_eip779() {
        let mut config = ForkConfig::mainnet();
        config.dao_fork_support = false;
        assert_eq!(config.get_eip779_transition(), None);
    }

    #[test]
    fn classic_features_are_unsupported() {
        let mut config = ForkConfig::mainnet();
        assert_eq!(
            config.set_ecip1017_transition(Some(5_000_000)),
            Err(SetError::UnsupportedFatal)
        );
        assert_eq!(
            config.set_ecip1017_transition(None),
            Err(SetError::UnsupportedNoop)
        );
    }

    #[test]
    fn upstream_json_field_names() {
        let json = r#"{
            "chainId": 1,
            "homesteadBlock": 1150000,
            "daoForkBlock": 1920000,
            "daoForkSupport": true,
            "eip150Block": 2463000,
            "byzantiumBlock": 4370000,
            "clique": {"period": 15, "epoch": 30000}
        }"#;
        let config: ForkConfig = serde_json::from_str(json).expect("valid");
        assert_eq!(config.chain_id, Some(1));
        assert_eq!(config.byzantium_block, Some(4_370_000));
        assert_eq!(
            config.clique_params(),
            Some(CliqueParams {
                period: 15,
                epoch: 30_000
            })
        );
    }
}
