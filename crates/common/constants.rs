use ethereum_types::H256;
use hex_literal::hex;

// === Difficulty constants ===

/// Floor the difficulty may never drop below (2^17).
pub const MINIMUM_DIFFICULTY: u64 = 131_072;
/// Bound divisor limiting how much difficulty changes per block.
pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;
/// Frontier decision boundary between raising and lowering difficulty.
pub const DURATION_LIMIT: u64 = 13;
/// Window of the exponential difficulty bomb period.
pub const EXP_DIFF_PERIOD: u64 = 100_000;

// === Header limits ===

/// Maximum byte size of header extra-data.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;
/// Max seconds from current time allowed for non-uncle blocks.
pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 15;
pub const MIN_GAS_LIMIT: u64 = 5000;
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;
/// Gas limit cap, 2^63 - 1.
pub const MAX_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;

// === EIP-1559 constants ===

pub const ELASTICITY_MULTIPLIER: u64 = 2;
pub const BASE_FEE_CHANGE_DENOMINATOR: u64 = 8;
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

// === Block rewards (wei) ===

pub const FRONTIER_BLOCK_REWARD: u128 = 5_000_000_000_000_000_000;
pub const EIP649_BLOCK_REWARD: u128 = 3_000_000_000_000_000_000;
pub const EIP1234_BLOCK_REWARD: u128 = 2_000_000_000_000_000_000;

// Musicoin payouts: the pre-fork base, the MCIP-3/MCIP-8 winner shares,
// and the per-block reservoir credits.
pub const MCIP0_BLOCK_REWARD: u128 = 314_000_000_000_000_000_000;
pub const MCIP3_BLOCK_REWARD: u128 = 250_000_000_000_000_000_000;
pub const MCIP8_BLOCK_REWARD: u128 = 50_000_000_000_000_000_000;
pub const MUSICOIN_UBI_REWARD: u128 = 50_000_000_000_000_000_000;
pub const MUSICOIN_DEV_REWARD: u128 = 14_000_000_000_000_000_000;

// === Difficulty bomb delays (blocks, cumulative totals) ===

pub const EIP649_BOMB_DELAY: u64 = 3_000_000;
pub const EIP1234_BOMB_DELAY: u64 = 5_000_000;
pub const EIP2384_BOMB_DELAY: u64 = 9_000_000;
pub const EIP3554_BOMB_DELAY: u64 = 9_700_000;
pub const EIP4345_BOMB_DELAY: u64 = 10_700_000;
pub const EIP5133_BOMB_DELAY: u64 = 11_400_000;

// === ECIP-1017 disinflation ===

/// Default era length when a config enables era rounds without a length.
pub const ECIP1017_ERA_ROUNDS: u64 = 5_000_000;
pub const DISINFLATION_RATE_QUOTIENT: u64 = 4;
pub const DISINFLATION_RATE_DIVISOR: u64 = 5;

// === DAO hard fork ===

/// Number of blocks from the fork point whose extra-data is constrained.
pub const DAO_FORK_EXTRA_RANGE: u64 = 10;
/// The unique extra-data a pro-fork client requires in the constrained range
/// ("dao-hard-fork").
pub const DAO_FORK_BLOCK_EXTRA: &[u8] = &hex!("64616f2d686172642d666f726b");

// === Well-known hashes ===

/// Keccak-256 of the RLP encoding of an empty list (the uncle hash of a
/// block without uncles).
pub const EMPTY_UNCLE_HASH: H256 = H256(hex!(
    "1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"
));

/// Keccak-256 of empty input.
pub const EMPTY_KECCAK_HASH: H256 = H256(hex!(
    "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
));
