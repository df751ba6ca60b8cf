//! Gas limit and EIP-1559 base fee header rules, shared by both engines.

use polyeth_common::config::{ChainConfig, is_enabled};
use polyeth_common::constants::{
    BASE_FEE_CHANGE_DENOMINATOR, ELASTICITY_MULTIPLIER, GAS_LIMIT_BOUND_DIVISOR, INITIAL_BASE_FEE,
    MIN_GAS_LIMIT,
};
use polyeth_common::types::BlockHeader;

use crate::error::ConsensusError;

/// Gas limit discipline: the limit may drift at most 1/1024th of the
/// parent limit per block and never below the floor.
pub fn verify_gas_limit(parent_limit: u64, limit: u64) -> Result<(), ConsensusError> {
    let delta = parent_limit.abs_diff(limit);
    let bound = parent_limit / GAS_LIMIT_BOUND_DIVISOR;
    if delta > bound {
        return Err(ConsensusError::InvalidGasLimit(format!(
            "have {limit}, want {parent_limit} +-= {bound}"
        )));
    }
    if limit < MIN_GAS_LIMIT {
        return Err(ConsensusError::InvalidGasLimit(format!(
            "have {limit}, minimum {MIN_GAS_LIMIT}"
        )));
    }
    Ok(())
}

/// Expected base fee of the block after `parent`.
pub fn calc_base_fee(config: &dyn ChainConfig, parent: &BlockHeader) -> u64 {
    if !is_enabled(config.get_eip1559_transition(), parent.number) {
        return INITIAL_BASE_FEE;
    }
    let parent_base = parent.base_fee_per_gas.unwrap_or(INITIAL_BASE_FEE);
    let target = parent.gas_limit / ELASTICITY_MULTIPLIER;
    if target == 0 {
        return parent_base;
    }
    match parent.gas_used.cmp(&target) {
        std::cmp::Ordering::Equal => parent_base,
        std::cmp::Ordering::Greater => {
            let delta = (parent.gas_used - target) as u128;
            let increase = (parent_base as u128 * delta
                / target as u128
                / BASE_FEE_CHANGE_DENOMINATOR as u128)
                .max(1);
            parent_base.saturating_add(increase as u64)
        }
        std::cmp::Ordering::Less => {
            let delta = (target - parent.gas_used) as u128;
            let decrease = parent_base as u128 * delta
                / target as u128
                / BASE_FEE_CHANGE_DENOMINATOR as u128;
            parent_base.saturating_sub(decrease as u64)
        }
    }
}

/// Verifies the gas limit and base fee of a header in the fee-market era.
pub fn verify_eip1559_header(
    config: &dyn ChainConfig,
    parent: &BlockHeader,
    header: &BlockHeader,
) -> Result<(), ConsensusError> {
    // The fork block doubles the gas limit via the elasticity multiplier.
    let mut parent_limit = parent.gas_limit;
    if !is_enabled(config.get_eip1559_transition(), parent.number) {
        parent_limit *= ELASTICITY_MULTIPLIER;
    }
    verify_gas_limit(parent_limit, header.gas_limit)?;

    let base_fee = header
        .base_fee_per_gas
        .ok_or(ConsensusError::MissingField("baseFeePerGas"))?;
    let expected = calc_base_fee(config, parent);
    if base_fee != expected {
        return Err(ConsensusError::InvalidBaseFee {
            expected,
            got: base_fee,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyeth_common::config::FeatureConfig;

    #[test]
    fn base_fee_transitions() {
        let mut config = FeatureConfig::default();
        config.eip1559_f_block = Some(10);

        // parent before the fork: initial base fee
        let parent = BlockHeader {
            number: 9,
            gas_limit: 20_000_000,
            ..Default::default()
        };
        assert_eq!(calc_base_fee(&config, &parent), INITIAL_BASE_FEE);

        // parent at target usage keeps the fee
        let parent = BlockHeader {
            number: 10,
            gas_limit: 20_000_000,
            gas_used: 10_000_000,
            base_fee_per_gas: Some(INITIAL_BASE_FEE),
            ..Default::default()
        };
        assert_eq!(calc_base_fee(&config, &parent), INITIAL_BASE_FEE);

        // full blocks raise it by an eighth
        let parent = BlockHeader {
            gas_used: 20_000_000,
            ..parent
        };
        assert_eq!(
            calc_base_fee(&config, &parent),
            INITIAL_BASE_FEE + INITIAL_BASE_FEE / 8
        );

        // empty blocks lower it by an eighth
        let parent = BlockHeader {
            gas_used: 0,
            ..parent
        };
        assert_eq!(
            calc_base_fee(&config, &parent),
            INITIAL_BASE_FEE - INITIAL_BASE_FEE / 8
        );
    }

    #[test]
    fn gas_limit_drift_bounds() {
        assert!(verify_gas_limit(1_000_000, 1_000_000).is_ok());
        assert!(verify_gas_limit(1_000_000, 1_000_000 + 976).is_ok());
        assert!(verify_gas_limit(1_000_000, 1_000_000 + 977).is_err());
        assert!(verify_gas_limit(1_000_000, 1_000_000 - 977).is_err());
        assert!(verify_gas_limit(5100, 4999).is_err());
    }

    #[test]
    fn fork_block_doubles_gas_target() {
        let mut config = FeatureConfig::default();
        config.eip1559_f_block = Some(10);

        let parent = BlockHeader {
            number: 9,
            gas_limit: 10_000_000,
            ..Default::default()
        };
        let header = BlockHeader {
            number: 10,
            gas_limit: 20_000_000,
            base_fee_per_gas: Some(INITIAL_BASE_FEE),
            ..Default::default()
        };
        verify_eip1559_header(&config, &parent, &header).expect("doubled limit accepted");

        let missing = BlockHeader {
            base_fee_per_gas: None,
            ..header
        };
        assert!(matches!(
            verify_eip1559_header(&config, &parent, &missing),
            Err(ConsensusError::MissingField("baseFeePerGas"))
        ));
    }
}
