//! Block and uncle reward accounting.
//!
//! Two regimes exist. Chains with an ECIP-1017 activation pay eras of
//! geometrically decaying rewards; everyone else reads the base reward off
//! the configured schedule (Frontier 5 ETH, dropping at the EIP-649 and
//! EIP-1234 forks).

use ethereum_types::{Address, H160, U256};
use hex_literal::hex;
use num_bigint::BigUint;
use polyeth_common::config::{ChainConfig, is_enabled};
use polyeth_common::constants::{
    DISINFLATION_RATE_DIVISOR, DISINFLATION_RATE_QUOTIENT, ECIP1017_ERA_ROUNDS,
    MCIP3_BLOCK_REWARD, MCIP8_BLOCK_REWARD, MUSICOIN_DEV_REWARD, MUSICOIN_UBI_REWARD,
};
use polyeth_common::types::BlockHeader;

use crate::engine::State;

/// The UBI reservoir credited on every Musicoin block past MCIP-3.
pub const MUSICOIN_UBI_RESERVOIR: Address =
    H160(hex!("00efdd5883ec628983e9063c7d969fe268bbf310"));
/// The developer reservoir credited alongside it.
pub const MUSICOIN_DEV_RESERVOIR: Address =
    H160(hex!("00756cf8159095948496617f5fb17ed95059f536"));

/// The ECIP-1017 era of a block. Era boundaries sit one past each multiple
/// of the era length, so the block at `era_len` itself still pays era 0.
pub fn block_era(number: u64, era_len: u64) -> u64 {
    if number == 0 || era_len == 0 {
        return 0;
    }
    (number - 1) / era_len
}

/// Era-decayed base reward: `base * (4/5)^era`, computed exactly.
fn era_reward(base: U256, era: u64) -> U256 {
    if era == 0 {
        return base;
    }
    let q = BigUint::from(DISINFLATION_RATE_QUOTIENT).pow(era as u32);
    let d = BigUint::from(DISINFLATION_RATE_DIVISOR).pow(era as u32);
    let reward = BigUint::from_bytes_be(&base.to_big_endian()) * q / d;
    // decay only shrinks the value, so it always fits back in 256 bits
    let bytes = reward.to_bytes_be();
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    U256::from_big_endian(&padded)
}

/// The winner's reward and one reward per uncle, in body order.
///
/// The winner total includes the inclusion bounty of 1/32nd of the base
/// reward per uncle. Uncle miners get the depth-scaled fraction
/// `(uncle.number + 8 - header.number) / 8` of the base reward, except in
/// ECIP-1017 eras past the first, which flatten it to 1/32nd.
pub fn get_rewards(
    config: &dyn ChainConfig,
    header: &BlockHeader,
    uncles: &[BlockHeader],
) -> (U256, Vec<U256>) {
    let base = config.block_reward_at(header.number);

    if is_enabled(config.get_ecip1017_transition(), header.number) {
        let era_len = config
            .get_ecip1017_era_rounds()
            .unwrap_or(ECIP1017_ERA_ROUNDS);
        let era = block_era(header.number, era_len);
        let winner_base = era_reward(base, era);

        let mut winner = winner_base;
        let mut uncle_rewards = Vec::with_capacity(uncles.len());
        for uncle in uncles {
            winner += winner_base / 32;
            if era == 0 {
                uncle_rewards.push(depth_scaled(winner_base, uncle, header));
            } else {
                uncle_rewards.push(winner_base / 32);
            }
        }
        return (winner, uncle_rewards);
    }

    let mut winner = base;
    let mut uncle_rewards = Vec::with_capacity(uncles.len());
    for uncle in uncles {
        winner += base / 32;
        uncle_rewards.push(depth_scaled(base, uncle, header));
    }
    (winner, uncle_rewards)
}

fn depth_scaled(base: U256, uncle: &BlockHeader, header: &BlockHeader) -> U256 {
    let numerator = (uncle.number + 8).saturating_sub(header.number);
    base * U256::from(numerator) / 8
}

/// Credits the block and uncle rewards to their coinbases.
pub fn accumulate_rewards(
    config: &dyn ChainConfig,
    state: &mut dyn State,
    header: &BlockHeader,
    uncles: &[BlockHeader],
) {
    if is_enabled(config.get_mcip3_transition(), header.number)
        || is_enabled(config.get_mcip8_transition(), header.number)
    {
        accumulate_musicoin_rewards(config, state, header, uncles);
        return;
    }
    let (winner, uncle_rewards) = get_rewards(config, header, uncles);
    for (uncle, reward) in uncles.iter().zip(uncle_rewards) {
        state.add_balance(uncle.coinbase, reward);
    }
    state.add_balance(header.coinbase, winner);
}

/// MCIP-3 replaces the winner's schedule reward with a fixed payout and
/// credits the UBI and developer reservoirs on every block; MCIP-8 later
/// cuts the winner share again. Uncle payouts stay scaled on the pre-fork
/// base reward, and the winner collects no inclusion bounty, exactly as
/// the chain shipped.
fn accumulate_musicoin_rewards(
    config: &dyn ChainConfig,
    state: &mut dyn State,
    header: &BlockHeader,
    uncles: &[BlockHeader],
) {
    let winner = if is_enabled(config.get_mcip8_transition(), header.number) {
        U256::from(MCIP8_BLOCK_REWARD)
    } else {
        U256::from(MCIP3_BLOCK_REWARD)
    };
    state.add_balance(header.coinbase, winner);
    state.add_balance(MUSICOIN_UBI_RESERVOIR, U256::from(MUSICOIN_UBI_REWARD));
    state.add_balance(MUSICOIN_DEV_RESERVOIR, U256::from(MUSICOIN_DEV_REWARD));

    let base = config.block_reward_at(header.number);
    for uncle in uncles {
        state.add_balance(uncle.coinbase, depth_scaled(base, uncle, header));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::Address;
    use polyeth_common::config::FeatureConfig;
    use std::collections::HashMap;

    const WEI_5ETH: u128 = 5_000_000_000_000_000_000;
    const WEI_4ETH: u128 = 4_000_000_000_000_000_000;
    const WEI_3ETH: u128 = 3_000_000_000_000_000_000;
    const WEI_2ETH: u128 = 2_000_000_000_000_000_000;

    fn header_at(number: u64, coinbase: u8) -> BlockHeader {
        BlockHeader {
            number,
            coinbase: Address::repeat_byte(coinbase),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct TestState(HashMap<Address, U256>);

    impl State for TestState {
        fn balance(&self, address: Address) -> U256 {
            self.0.get(&address).copied().unwrap_or_default()
        }
        fn add_balance(&mut self, address: Address, amount: U256) {
            *self.0.entry(address).or_default() += amount;
        }
        fn set_balance(&mut self, address: Address, amount: U256) {
            self.0.insert(address, amount);
        }
    }

    #[test]
    fn mainnet_reward_schedule() {
        let config = FeatureConfig::mainnet();
        let cases = [
            (1u64, WEI_5ETH),
            (4_369_999, WEI_5ETH),
            (4_370_000, WEI_3ETH),
            (7_280_000, WEI_2ETH),
            (15_000_000, WEI_2ETH),
        ];
        for (number, expected) in cases {
            let (winner, _) = get_rewards(&config, &header_at(number, 1), &[]);
            assert_eq!(winner, U256::from(expected), "block {number}");
        }
    }

    #[test]
    fn uncle_rewards_scale_with_depth() {
        let config = FeatureConfig::mainnet();
        let header = header_at(10, 1);
        let uncles = [header_at(9, 2), header_at(3, 3)];
        let (winner, rewards) = get_rewards(&config, &header, &uncles);

        let base = U256::from(WEI_5ETH);
        // depth 1: 7/8, depth 7: 1/8
        assert_eq!(rewards[0], base * 7 / 8);
        assert_eq!(rewards[1], base / 8);
        // winner collects 1/32nd per included uncle
        assert_eq!(winner, base + base / 32 * 2);
    }

    #[test]
    fn era_boundaries() {
        assert_eq!(block_era(0, 5_000_000), 0);
        assert_eq!(block_era(1, 5_000_000), 0);
        assert_eq!(block_era(5_000_000, 5_000_000), 0);
        assert_eq!(block_era(5_000_001, 5_000_000), 1);
        assert_eq!(block_era(10_000_000, 5_000_000), 1);
        assert_eq!(block_era(10_000_001, 5_000_000), 2);
    }

    #[test]
    fn classic_era_decay() {
        let config = FeatureConfig::classic();

        // the activation block itself still sits in era 0
        let (winner, _) = get_rewards(&config, &header_at(5_000_000, 1), &[]);
        assert_eq!(winner, U256::from(WEI_5ETH));

        // era 1: 5 ETH * 4/5
        let (winner, _) = get_rewards(&config, &header_at(5_000_001, 1), &[]);
        assert_eq!(winner, U256::from(WEI_4ETH));

        // era 2: 5 ETH * 16/25 = 3.2 ETH
        let (winner, _) = get_rewards(&config, &header_at(10_000_001, 1), &[]);
        assert_eq!(winner, U256::from(3_200_000_000_000_000_000u128));
    }

    #[test]
    fn classic_era_uncle_rewards() {
        let config = FeatureConfig::classic();

        // era 0 keeps the depth-scaled formula
        let header = header_at(5_000_000, 1);
        let uncles = [header_at(4_999_998, 2)];
        let (_, rewards) = get_rewards(&config, &header, &uncles);
        assert_eq!(rewards[0], U256::from(WEI_5ETH) * 6 / 8);

        // era 1 flattens uncles to 1/32nd of the era reward
        let header = header_at(6_000_000, 1);
        let uncles = [header_at(5_999_999, 2)];
        let (winner, rewards) = get_rewards(&config, &header, &uncles);
        let era_base = U256::from(WEI_4ETH);
        assert_eq!(rewards[0], era_base / 32);
        assert_eq!(winner, era_base + era_base / 32);
    }

    #[test]
    fn musicoin_forks_pay_fixed_reservoirs() {
        use polyeth_common::constants::MCIP0_BLOCK_REWARD;

        let mut config = FeatureConfig::default();
        config.mcip3_block = Some(1_200_001);
        config.mcip8_block = Some(5_200_001);
        config
            .block_rewards
            .insert(0, U256::from(MCIP0_BLOCK_REWARD));

        // before the UBI fork the schedule reward applies untouched
        let mut state = TestState::default();
        accumulate_rewards(&config, &mut state, &header_at(1_200_000, 1), &[]);
        assert_eq!(
            state.balance(Address::repeat_byte(1)),
            U256::from(MCIP0_BLOCK_REWARD)
        );
        assert_eq!(state.balance(MUSICOIN_UBI_RESERVOIR), U256::zero());

        // MCIP-3: fixed winner share plus both reservoirs; the uncle still
        // collects the depth-scaled cut of the pre-fork base
        let mut state = TestState::default();
        let header = header_at(1_200_001, 1);
        let uncles = [header_at(1_200_000, 2)];
        accumulate_rewards(&config, &mut state, &header, &uncles);
        assert_eq!(
            state.balance(Address::repeat_byte(1)),
            U256::from(MCIP3_BLOCK_REWARD)
        );
        assert_eq!(
            state.balance(MUSICOIN_UBI_RESERVOIR),
            U256::from(MUSICOIN_UBI_REWARD)
        );
        assert_eq!(
            state.balance(MUSICOIN_DEV_RESERVOIR),
            U256::from(MUSICOIN_DEV_REWARD)
        );
        assert_eq!(
            state.balance(Address::repeat_byte(2)),
            U256::from(MCIP0_BLOCK_REWARD) * 7 / 8
        );

        // MCIP-8 cuts the winner share; the reservoirs keep their credits
        let mut state = TestState::default();
        accumulate_rewards(&config, &mut state, &header_at(5_200_001, 1), &[]);
        assert_eq!(
            state.balance(Address::repeat_byte(1)),
            U256::from(MCIP8_BLOCK_REWARD)
        );
        assert_eq!(
            state.balance(MUSICOIN_UBI_RESERVOIR),
            U256::from(MUSICOIN_UBI_REWARD)
        );
    }

    #[test]
    fn accumulate_credits_all_coinbases() {
        let config = FeatureConfig::mainnet();
        let header = header_at(10, 1);
        let uncles = [header_at(9, 2)];
        let mut state = TestState::default();

        accumulate_rewards(&config, &mut state, &header, &uncles);

        let base = U256::from(WEI_5ETH);
        assert_eq!(state.balance(Address::repeat_byte(1)), base + base / 32);
        assert_eq!(state.balance(Address::repeat_byte(2)), base * 7 / 8);
    }
}
