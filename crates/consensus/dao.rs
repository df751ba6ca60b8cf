//! DAO hard-fork consensus rules: the extra-data constraint around the fork
//! block and the one-time balance transfer into the refund contract.

use ethereum_types::{Address, H160, U256};
use hex_literal::hex;
use polyeth_common::config::ChainConfig;
use polyeth_common::constants::{DAO_FORK_BLOCK_EXTRA, DAO_FORK_EXTRA_RANGE};
use polyeth_common::types::BlockHeader;

use crate::engine::State;
use crate::error::ConsensusError;

/// The contract the drained balances are refunded into.
pub const DAO_REFUND_CONTRACT: Address =
    H160(hex!("bf4ed7b27f1d666546e30d74d50d173d20bca754"));

/// Accounts drained at the fork block: the DAO contract, its extra-balance
/// account, and the child DAOs with their extra-balance counterparts.
pub const DAO_DRAIN_LIST: &[Address] = &[
    H160(hex!("d4fe7bc31cedb7bfb8a345f31e668033056b2728")),
    H160(hex!("b3fb0e5aba0e20e5c49d252dfd30e102b171a425")),
    H160(hex!("2c19c7f9ae8b751e37aeb2d93a699722395ae18f")),
    H160(hex!("bb9bc244d798123fde783fcc1c72d3bb8c189413")),
    H160(hex!("807640a13483f8ac783c557fcdf27be11ea4ac7a")),
];

/// Validates the extra-data of headers around the DAO fork block.
///
/// A config carrying an EIP-779 transition is pro-fork: every block in the
/// `[fork, fork + 10)` range must carry the unique "dao-hard-fork"
/// extra-data. Configs without the transition do not care.
pub fn verify_header_extra_data(
    config: &dyn ChainConfig,
    header: &BlockHeader,
) -> Result<(), ConsensusError> {
    let Some(fork) = config.get_eip779_transition() else {
        return Ok(());
    };
    let limit = fork.saturating_add(DAO_FORK_EXTRA_RANGE);
    if header.number < fork || header.number >= limit {
        return Ok(());
    }
    if header.extra_data.as_ref() != DAO_FORK_BLOCK_EXTRA {
        return Err(ConsensusError::InvalidDaoExtraData);
    }
    Ok(())
}

/// Moves every drain-list balance into the refund contract. Applied once,
/// when the fork block is processed.
pub fn apply_dao_hard_fork(state: &mut dyn State) {
    for addr in DAO_DRAIN_LIST {
        let balance = state.balance(*addr);
        state.add_balance(DAO_REFUND_CONTRACT, balance);
        state.set_balance(*addr, U256::zero());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyeth_common::config::FeatureConfig;
    use std::collections::HashMap;

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

    fn header_at(number: u64, extra: &[u8]) -> BlockHeader {
        BlockHeader {
            number,
            extra_data: extra.to_vec().into(),
            ..Default::default()
        }
    }

    #[test]
    fn window_requires_fork_extra_data() {
        let config = FeatureConfig::mainnet();
        let fork = 1_920_000;

        // pro-fork extra required inside [fork, fork+10)
        for number in [fork, fork + 5, fork + 9] {
            assert!(verify_header_extra_data(&config, &header_at(number, DAO_FORK_BLOCK_EXTRA)).is_ok());
            assert!(matches!(
                verify_header_extra_data(&config, &header_at(number, b"")),
                Err(ConsensusError::InvalidDaoExtraData)
            ));
        }

        // anything goes outside the window
        assert!(verify_header_extra_data(&config, &header_at(fork - 1, b"")).is_ok());
        assert!(verify_header_extra_data(&config, &header_at(fork + 10, b"")).is_ok());
    }

    #[test]
    fn no_fork_config_ignores_extra_data() {
        let config = FeatureConfig::classic();
        assert!(verify_header_extra_data(&config, &header_at(1_920_000, b"")).is_ok());
        assert!(
            verify_header_extra_data(&config, &header_at(1_920_000, DAO_FORK_BLOCK_EXTRA)).is_ok()
        );
    }

    #[test]
    fn drains_balances_into_refund_contract() {
        let mut state = TestState::default();
        state.set_balance(DAO_DRAIN_LIST[0], U256::from(100));
        state.set_balance(DAO_DRAIN_LIST[3], U256::from(250));
        state.set_balance(DAO_REFUND_CONTRACT, U256::from(7));

        apply_dao_hard_fork(&mut state);

        assert_eq!(state.balance(DAO_REFUND_CONTRACT), U256::from(357));
        for addr in DAO_DRAIN_LIST {
            assert_eq!(state.balance(*addr), U256::zero());
        }
    }
}
