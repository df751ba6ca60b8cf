//! Difficulty adjustment across every historical rule set. The adjustment
//! algorithm (Frontier, Homestead/EIP-2, Byzantium/EIP-100B) is selected by
//! the highest-priority feature enabled at the child block; the difficulty
//! bomb is then applied unless defused (ECIP-1041), with its reference
//! block paused (ECIP-1010) or pushed back by the delay schedule.
//!
//! Two implementations are kept: an arbitrary-precision reference and a
//! 256-bit-native calculator. The native one rejects results that do not
//! fit 256 bits instead of silently wrapping.

use ethereum_types::U256;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use polyeth_common::config::{ChainConfig, is_enabled};
use polyeth_common::constants::{DIFFICULTY_BOUND_DIVISOR, EXP_DIFF_PERIOD};
use polyeth_common::types::BlockHeader;

use crate::error::ConsensusError;

/// The bomb reference block: child number paused at the ECIP-1010 block
/// (or shifted back by its length once the pause ends), or pushed back by
/// the summed delay schedule. Saturates at zero, which disables the bomb.
fn bomb_reference(config: &dyn ChainConfig, next: u64) -> u64 {
    if is_enabled(config.get_ecip1010_pause_transition(), next) {
        let pause = config
            .get_ecip1010_pause_transition()
            .unwrap_or_default();
        match config.get_ecip1010_continue_transition() {
            Some(explosion) if next >= explosion => next - (explosion - pause),
            _ => pause,
        }
    } else {
        let delay = config.bomb_delay_sum(next).min(U256::from(next)).as_u64();
        next - delay
    }
}

/// Byzantium-and-later adjustment sign and magnitude:
/// `max((2 if uncles else 1) - τ/9, -99)`.
/// Homestead: `max(1 - τ/10, -99)`. Returns (magnitude, is_negative).
fn adjustment_factor(time: u64, parent: &BlockHeader, divisor: u64, base: u64) -> (u64, bool) {
    let elapsed = time.saturating_sub(parent.timestamp) / divisor;
    if elapsed < base {
        (base - elapsed, false)
    } else {
        ((elapsed - base).min(99), true)
    }
}

fn factors(config: &dyn ChainConfig, time: u64, parent: &BlockHeader, next: u64) -> (u64, bool) {
    if is_enabled(config.get_eip100b_transition(), next) {
        let base = if parent.has_ommers() { 2 } else { 1 };
        adjustment_factor(time, parent, 9, base)
    } else if is_enabled(config.get_eip2_transition(), next) {
        adjustment_factor(time, parent, 10, 1)
    } else if time.saturating_sub(parent.timestamp) < config.duration_limit() {
        (1, false)
    } else {
        (1, true)
    }
}

/// 256-bit-native difficulty calculator. Returns
/// [`ConsensusError::DifficultyOverflow`] when the result exceeds 256 bits.
pub fn calc_difficulty(
    config: &dyn ChainConfig,
    time: u64,
    parent: &BlockHeader,
) -> Result<U256, ConsensusError> {
    let next = parent.number + 1;
    let adjust = parent.difficulty / U256::from(DIFFICULTY_BOUND_DIVISOR);
    let (magnitude, negative) = factors(config, time, parent, next);

    let step = adjust
        .checked_mul(U256::from(magnitude))
        .ok_or(ConsensusError::DifficultyOverflow)?;
    let mut diff = if negative {
        parent.difficulty.saturating_sub(step)
    } else {
        parent
            .difficulty
            .checked_add(step)
            .ok_or(ConsensusError::DifficultyOverflow)?
    };

    let minimum = config.minimum_difficulty();
    if diff < minimum {
        diff = minimum;
    }

    if is_enabled(config.get_ecip1041_transition(), next) {
        return Ok(diff);
    }

    let period = bomb_reference(config, next) / EXP_DIFF_PERIOD;
    if period > 1 {
        let exponent = period - 2;
        if exponent >= 256 {
            return Err(ConsensusError::DifficultyOverflow);
        }
        let bomb = U256::one() << (exponent as usize);
        diff = diff
            .checked_add(bomb)
            .ok_or(ConsensusError::DifficultyOverflow)?;
    }
    Ok(diff)
}

fn u256_to_biguint(v: U256) -> BigUint {
    BigUint::from_bytes_be(&v.to_big_endian())
}

/// Arbitrary-precision reference calculator. Never overflows; used to
/// cross-check the native implementation.
pub fn calc_difficulty_big(config: &dyn ChainConfig, time: u64, parent: &BlockHeader) -> BigUint {
    let next = parent.number + 1;
    let parent_diff = u256_to_biguint(parent.difficulty);
    let adjust = &parent_diff / BigUint::from(DIFFICULTY_BOUND_DIVISOR);
    let (magnitude, negative) = factors(config, time, parent, next);

    let step = adjust * BigUint::from(magnitude);
    let mut diff = if negative {
        if step > parent_diff {
            BigUint::zero()
        } else {
            &parent_diff - step
        }
    } else {
        &parent_diff + step
    };

    let minimum = u256_to_biguint(config.minimum_difficulty());
    if diff < minimum {
        diff = minimum;
    }

    if is_enabled(config.get_ecip1041_transition(), next) {
        return diff;
    }

    let period = bomb_reference(config, next) / EXP_DIFF_PERIOD;
    if period > 1 {
        diff += BigUint::one() << (period - 2);
    }
    diff
}
