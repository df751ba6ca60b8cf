use std::sync::OnceLock;

use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::constants::{
    ECIP1017_ERA_ROUNDS, EIP649_BLOCK_REWARD, EIP649_BOMB_DELAY, EIP1234_BLOCK_REWARD,
    EIP1234_BOMB_DELAY, EIP2384_BOMB_DELAY, EIP3554_BOMB_DELAY, EIP4345_BOMB_DELAY,
    EIP5133_BOMB_DELAY, FRONTIER_BLOCK_REWARD,
};
use crate::numeric::{U64HexMap, U64HexValOrMap};

use super::fork::{CliqueParams, EthashParams};
use super::{ChainConfig, SetError, schedule_set_total_for_height};

/// Feature-granular chain configuration, keyed by individual EIP/ECIP
/// activations. The difficulty-bomb delay and block-reward schedules are
/// the source of truth for the bomb-delay EIPs; their activation blocks
/// are inferred from the schedules and cached.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip2_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip7_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip150_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip155_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip160_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip161_f_block: Option<u64>,
    #[serde(rename = "eip100FBlock", skip_serializing_if = "Option::is_none")]
    pub eip100b_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip779_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip1559_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip4895_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip4895_f_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip4844_f_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eip4788_f_time: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1010_pause_block: Option<u64>,
    /// Bomb pause duration; the continue transition is `pause + length`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1010_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1017_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1017_era_rounds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1041_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecip1099_f_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecbp1100_f_block: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcip3_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcip8_block: Option<u64>,

    #[serde(
        rename = "difficultyBombDelays",
        skip_serializing_if = "map_is_empty_hex"
    )]
    pub difficulty_bomb_delays: U64HexMap,
    #[serde(rename = "blockReward", skip_serializing_if = "map_is_empty_val")]
    pub block_rewards: U64HexValOrMap,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethash: Option<EthashParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clique: Option<CliqueParams>,

    #[serde(skip)]
    inferred: InferredCache,
}

fn map_is_empty_hex(m: &U64HexMap) -> bool {
    m.is_empty()
}

fn map_is_empty_val(m: &U64HexValOrMap) -> bool {
    m.is_empty()
}

/// Lazily computed activation blocks for the schedule-inferred EIPs.
/// Reset whenever a schedule mutates.
#[derive(Clone, Debug, Default, PartialEq)]
struct InferredCache {
    eip649: OnceLock<Option<u64>>,
    eip1234: OnceLock<Option<u64>>,
    eip2384: OnceLock<Option<u64>>,
    eip3554: OnceLock<Option<u64>>,
    eip4345: OnceLock<Option<u64>>,
    eip5133: OnceLock<Option<u64>>,
}

/// Finds the block at which the cumulative bomb delay reaches exactly
/// `want_delay`, additionally requiring the block reward at that block to
/// equal `want_reward` when given.
fn schedule_meets(
    delays: &U64HexMap,
    rewards: &U64HexValOrMap,
    want_delay: u64,
    want_reward: Option<u128>,
) -> Option<u64> {
    let want = U256::from(want_delay);
    let mut acc = U256::zero();
    let mut block = None;
    for (k, v) in delays.iter() {
        acc = acc.saturating_add(*v);
        if acc == want {
            block = Some(*k);
            break;
        }
        if acc > want {
            return None;
        }
    }
    let block = block?;
    if let Some(reward) = want_reward {
        if rewards.get(&block) != Some(&U256::from(reward)) {
            return None;
        }
    }
    Some(block)
}

impl FeatureConfig {
    fn invalidate_inferred(&mut self) {
        self.inferred = InferredCache::default();
    }

    /// Writes the cumulative bomb delay `total` (and optionally a block
    /// reward) at `height`, storing only the increment over earlier
    /// entries.
    fn set_bomb_stage(
        &mut self,
        height: Option<u64>,
        total: u64,
        reward: Option<u128>,
    ) -> Result<(), SetError> {
        let Some(height) = height else {
            self.invalidate_inferred();
            return Ok(());
        };
        schedule_set_total_for_height(
            &mut self.difficulty_bomb_delays.0,
            height,
            U256::from(total),
        );
        if let Some(reward) = reward {
            self.block_rewards.insert(height, U256::from(reward));
        }
        self.invalidate_inferred();
        Ok(())
    }

    /// Mainnet expressed in the granular dialect.
    pub fn mainnet() -> FeatureConfig {
        let mut config = FeatureConfig {
            chain_id: Some(1),
            eip2_f_block: Some(1_150_000),
            eip7_f_block: Some(1_150_000),
            eip150_block: Some(2_463_000),
            eip155_block: Some(2_675_000),
            eip160_f_block: Some(2_675_000),
            eip161_f_block: Some(2_675_000),
            eip100b_f_block: Some(4_370_000),
            eip779_f_block: Some(1_920_000),
            eip1559_f_block: Some(12_965_000),
            eip4895_f_time: Some(1_681_338_455),
            eip4844_f_time: Some(1_710_338_135),
            eip4788_f_time: Some(1_710_338_135),
            ethash: Some(EthashParams::default()),
            ..Default::default()
        };
        config
            .block_rewards
            .insert(0, U256::from(FRONTIER_BLOCK_REWARD));
        let _ = config.set_bomb_stage(
            Some(4_370_000),
            EIP649_BOMB_DELAY,
            Some(EIP649_BLOCK_REWARD),
        );
        let _ = config.set_bomb_stage(
            Some(7_280_000),
            EIP1234_BOMB_DELAY,
            Some(EIP1234_BLOCK_REWARD),
        );
        let _ = config.set_bomb_stage(Some(9_200_000), EIP2384_BOMB_DELAY, None);
        let _ = config.set_bomb_stage(Some(12_965_000), EIP3554_BOMB_DELAY, None);
        let _ = config.set_bomb_stage(Some(13_773_000), EIP4345_BOMB_DELAY, None);
        let _ = config.set_bomb_stage(Some(15_050_000), EIP5133_BOMB_DELAY, None);
        config
    }

    /// Ethereum Classic mainnet, exercising the ECIP feature set.
    pub fn classic() -> FeatureConfig {
        let mut config = FeatureConfig {
            chain_id: Some(61),
            eip2_f_block: Some(1_150_000),
            eip7_f_block: Some(1_150_000),
            eip150_block: Some(2_500_000),
            eip155_block: Some(3_000_000),
            eip160_f_block: Some(3_000_000),
            eip161_f_block: Some(8_772_000),
            eip100b_f_block: Some(8_772_000),
            ecip1010_pause_block: Some(3_000_000),
            ecip1010_length: Some(2_000_000),
            ecip1017_f_block: Some(5_000_000),
            ecip1017_era_rounds: Some(5_000_000),
            ecip1041_block: Some(5_900_000),
            ecip1099_f_block: Some(11_700_000),
            ecbp1100_f_block: Some(11_380_000),
            ethash: Some(EthashParams::default()),
            ..Default::default()
        };
        config
            .block_rewards
            .insert(0, U256::from(FRONTIER_BLOCK_REWARD));
        config
    }
}

impl ChainConfig for FeatureConfig {
    fn get_eip2_transition(&self) -> Option<u64> {
        self.eip2_f_block
    }
    fn set_eip2_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip2_f_block = v;
        Ok(())
    }
    fn get_eip7_transition(&self) -> Option<u64> {
        self.eip7_f_block
    }
    fn set_eip7_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip7_f_block = v;
        Ok(())
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
        self.eip160_f_block
    }
    fn set_eip160_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip160_f_block = v;
        Ok(())
    }
    fn get_eip161_transition(&self) -> Option<u64> {
        self.eip161_f_block
    }
    fn set_eip161_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip161_f_block = v;
        Ok(())
    }

    fn get_eip100b_transition(&self) -> Option<u64> {
        self.eip100b_f_block
    }
    fn set_eip100b_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip100b_f_block = v;
        Ok(())
    }

    fn get_eip649_transition(&self) -> Option<u64> {
        *self.inferred.eip649.get_or_init(|| {
            schedule_meets(
                &self.difficulty_bomb_delays,
                &self.block_rewards,
                EIP649_BOMB_DELAY,
                Some(EIP649_BLOCK_REWARD),
            )
        })
    }
    fn set_eip649_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.set_bomb_stage(v, EIP649_BOMB_DELAY, Some(EIP649_BLOCK_REWARD))
    }
    fn get_eip1234_transition(&self) -> Option<u64> {
        *self.inferred.eip1234.get_or_init(|| {
            schedule_meets(
                &self.difficulty_bomb_delays,
                &self.block_rewards,
                EIP1234_BOMB_DELAY,
                Some(EIP1234_BLOCK_REWARD),
            )
        })
    }
    fn set_eip1234_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.set_bomb_stage(v, EIP1234_BOMB_DELAY, Some(EIP1234_BLOCK_REWARD))
    }
    fn get_eip2384_transition(&self) -> Option<u64> {
        *self.inferred.eip2384.get_or_init(|| {
            schedule_meets(
                &self.difficulty_bomb_delays,
                &self.block_rewards,
                EIP2384_BOMB_DELAY,
                None,
            )
        })
    }
    fn set_eip2384_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.set_bomb_stage(v, EIP2384_BOMB_DELAY, None)
    }
    fn get_eip3554_transition(&self) -> Option<u64> {
        *self.inferred.eip3554.get_or_init(|| {
            schedule_meets(
                &self.difficulty_bomb_delays,
                &self.block_rewards,
                EIP3554_BOMB_DELAY,
                None,
            )
        })
    }
    fn set_eip3554_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.set_bomb_stage(v, EIP3554_BOMB_DELAY, None)
    }
    fn get_eip4345_transition(&self) -> Option<u64> {
        *self.inferred.eip4345.get_or_init(|| {
            schedule_meets(
                &self.difficulty_bomb_delays,
                &self.block_rewards,
                EIP4345_BOMB_DELAY,
                None,
            )
        })
    }
    fn set_eip4345_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.set_bomb_stage(v, EIP4345_BOMB_DELAY, None)
    }
    fn get_eip5133_transition(&self) -> Option<u64> {
        *self.inferred.eip5133.get_or_init(|| {
            schedule_meets(
                &self.difficulty_bomb_delays,
                &self.block_rewards,
                EIP5133_BOMB_DELAY,
                None,
            )
        })
    }
    fn set_eip5133_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.set_bomb_stage(v, EIP5133_BOMB_DELAY, None)
    }

    fn get_eip779_transition(&self) -> Option<u64> {
        self.eip779_f_block
    }
    fn set_eip779_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip779_f_block = v;
        Ok(())
    }

    fn get_eip1559_transition(&self) -> Option<u64> {
        self.eip1559_f_block
    }
    fn set_eip1559_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip1559_f_block = v;
        Ok(())
    }
    fn get_eip4895_transition(&self) -> Option<u64> {
        self.eip4895_f_block
    }
    fn set_eip4895_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip4895_f_block = v;
        Ok(())
    }
    fn get_eip4895_transition_time(&self) -> Option<u64> {
        self.eip4895_f_time
    }
    fn set_eip4895_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip4895_f_time = v;
        Ok(())
    }
    fn get_eip4844_transition_time(&self) -> Option<u64> {
        self.eip4844_f_time
    }
    fn set_eip4844_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip4844_f_time = v;
        Ok(())
    }
    fn get_eip4788_transition_time(&self) -> Option<u64> {
        self.eip4788_f_time
    }
    fn set_eip4788_transition_time(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.eip4788_f_time = v;
        Ok(())
    }

    fn get_ecip1010_pause_transition(&self) -> Option<u64> {
        self.ecip1010_pause_block
    }
    fn set_ecip1010_pause_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.ecip1010_pause_block = v;
        Ok(())
    }
    fn get_ecip1010_continue_transition(&self) -> Option<u64> {
        match (self.ecip1010_pause_block, self.ecip1010_length) {
            (Some(pause), Some(length)) => Some(pause + length),
            _ => None,
        }
    }
    fn set_ecip1010_continue_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        match v {
            None => {
                self.ecip1010_length = None;
                Ok(())
            }
            Some(n) => {
                let pause = self
                    .ecip1010_pause_block
                    .ok_or(SetError::UnsupportedFatal)?;
                let length = n.checked_sub(pause).ok_or(SetError::UnsupportedFatal)?;
                self.ecip1010_length = Some(length);
                Ok(())
            }
        }
    }
    fn get_ecip1017_transition(&self) -> Option<u64> {
        self.ecip1017_f_block
    }
    fn set_ecip1017_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.ecip1017_f_block = v;
        Ok(())
    }
    fn get_ecip1017_era_rounds(&self) -> Option<u64> {
        self.ecip1017_era_rounds
            .or(self.ecip1017_f_block.map(|_| ECIP1017_ERA_ROUNDS))
    }
    fn set_ecip1017_era_rounds(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.ecip1017_era_rounds = v;
        Ok(())
    }
    fn get_ecip1041_transition(&self) -> Option<u64> {
        self.ecip1041_block
    }
    fn set_ecip1041_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.ecip1041_block = v;
        Ok(())
    }
    fn get_ecip1099_transition(&self) -> Option<u64> {
        self.ecip1099_f_block
    }
    fn set_ecip1099_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.ecip1099_f_block = v;
        Ok(())
    }
    fn get_ecbp1100_transition(&self) -> Option<u64> {
        self.ecbp1100_f_block
    }
    fn set_ecbp1100_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.ecbp1100_f_block = v;
        Ok(())
    }

    fn get_mcip3_transition(&self) -> Option<u64> {
        self.mcip3_block
    }
    fn set_mcip3_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.mcip3_block = v;
        Ok(())
    }
    fn get_mcip8_transition(&self) -> Option<u64> {
        self.mcip8_block
    }
    fn set_mcip8_transition(&mut self, v: Option<u64>) -> Result<(), SetError> {
        self.mcip8_block = v;
        Ok(())
    }

    fn get_difficulty_bomb_delays(&self) -> U64HexMap {
        self.difficulty_bomb_delays.clone()
    }
    fn set_difficulty_bomb_delays(&mut self, v: U64HexMap) -> Result<(), SetError> {
        self.difficulty_bomb_delays = v;
        self.invalidate_inferred();
        Ok(())
    }
    fn get_block_rewards(&self) -> U64HexValOrMap {
        self.block_rewards.clone()
    }
    fn set_block_rewards(&mut self, v: U64HexValOrMap) -> Result<(), SetError> {
        self.block_rewards = v;
        self.invalidate_inferred();
        Ok(())
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
    fn schedule_inference_mainnet() {
        let config = FeatureConfig::mainnet();
        assert_eq!(config.get_eip649_transition(), Some(4_370_000));
        assert_eq!(config.get_eip1234_transition(), Some(7_280_000));
        assert_eq!(config.get_eip2384_transition(), Some(9_200_000));
        assert_eq!(config.get_eip3554_transition(), Some(12_965_000));
        assert_eq!(config.get_eip4345_transition(), Some(13_773_000));
        assert_eq!(config.get_eip5133_transition(), Some(15_050_000));
    }

    #[test]
    fn inference_is_idempotent_and_survives_set() {
        let mut config = FeatureConfig::default();
        config.set_eip649_transition(Some(4_370_000)).expect("granular");
        assert_eq!(config.get_eip649_transition(), Some(4_370_000));
        // second read hits the cache
        assert_eq!(config.get_eip649_transition(), Some(4_370_000));

        config.set_eip1234_transition(Some(7_280_000)).expect("granular");
        assert_eq!(config.get_eip1234_transition(), Some(7_280_000));
        // the earlier stage is still readable
        assert_eq!(config.get_eip649_transition(), Some(4_370_000));
        // and the schedule stores only the increment
        assert_eq!(
            config.difficulty_bomb_delays.get(&7_280_000),
            Some(&U256::from(2_000_000))
        );
    }

    #[test]
    fn mutating_schedule_invalidates_cache() {
        let mut config = FeatureConfig::mainnet();
        assert_eq!(config.get_eip649_transition(), Some(4_370_000));

        config
            .set_difficulty_bomb_delays(U64HexMap::default())
            .expect("granular");
        assert_eq!(config.get_eip649_transition(), None);
    }

    #[test]
    fn ecip1010_continue_is_pause_plus_length() {
        let config = FeatureConfig::classic();
        assert_eq!(config.get_ecip1010_pause_transition(), Some(3_000_000));
        assert_eq!(config.get_ecip1010_continue_transition(), Some(5_000_000));
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let config = FeatureConfig::mainnet();
        let json = serde_json::to_string(&config).expect("serializable");
        let back: FeatureConfig = serde_json::from_str(&json).expect("roundtrip");
        assert_eq!(back.eip2_f_block, config.eip2_f_block);
        assert_eq!(back.difficulty_bomb_delays, config.difficulty_bomb_delays);
        assert_eq!(back.block_rewards, config.block_rewards);
        assert_eq!(back.get_eip1234_transition(), Some(7_280_000));
    }

    #[test]
    fn granular_field_names() {
        let json = r#"{
            "eip2FBlock": 1150000,
            "eip100FBlock": 4370000,
            "mcip3Block": 1200001,
            "difficultyBombDelays": {"0x42ae50": "0x2dc6c0"},
            "blockReward": "0x4563918244f40000",
            "ethash": {}
        }"#;
        let config: FeatureConfig = serde_json::from_str(json).expect("valid");
        assert_eq!(config.eip2_f_block, Some(1_150_000));
        assert_eq!(config.eip100b_f_block, Some(4_370_000));
        assert_eq!(config.get_mcip3_transition(), Some(1_200_001));
        assert_eq!(
            config.difficulty_bomb_delays.get(&4_370_000),
            Some(&U256::from(3_000_000))
        );
        assert_eq!(
            config.block_rewards.get(&0),
            Some(&U256::from(5_000_000_000_000_000_000u64))
        );
        assert!(config.is_ethash());
    }

    #[test]
    fn bomb_delay_sum_walks_schedule() {
        let config = FeatureConfig::mainnet();
        assert_eq!(config.bomb_delay_sum(4_369_999), U256::zero());
        assert_eq!(config.bomb_delay_sum(4_370_000), U256::from(3_000_000));
        assert_eq!(config.bomb_delay_sum(15_050_000), U256::from(11_400_000));
    }
}
