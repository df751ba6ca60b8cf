use thiserror::Error;

use super::convert::{FEATURES, FeatureKind};
use super::{ChainConfig, is_enabled};

/// Placeholder activation values some chainspecs use for "never". They
/// carry no fork boundary and are treated as unset.
const SENTINELS: [u64; 4] = [
    u64::MAX,
    0x7fff_ffff_ffff_ffff,
    0x07ff_ffff_ffff_ffff,
    0x007f_ffff_ffff_ffff,
];

fn normalize(v: Option<u64>) -> Option<u64> {
    v.filter(|n| !SENTINELS.contains(n))
}

/// Block-activated features that never split the chain; they arbitrate
/// reorgs and are excluded from fork enumeration and compatibility.
fn is_reorg_arbiter(name: &str) -> bool {
    name.starts_with("ecbp")
}

/// The chain's fork boundaries: every distinct non-zero block-activated
/// transition, ascending. Sentinel "never" values are dropped.
pub fn forks(config: &dyn ChainConfig) -> Vec<u64> {
    let mut blocks: Vec<u64> = FEATURES
        .iter()
        .filter(|f| f.kind == FeatureKind::Block && !is_reorg_arbiter(f.name))
        .filter_map(|f| normalize((f.get)(config)))
        .filter(|&n| n != 0)
        .collect();
    blocks.sort_unstable();
    blocks.dedup();
    blocks
}

/// True when the two configurations describe the same chain: identical
/// fork boundaries, the same feature set active at every boundary, and
/// identical bomb-delay and reward values along the schedule.
pub fn equivalent(a: &dyn ChainConfig, b: &dyn ChainConfig) -> bool {
    let boundaries = forks(a);
    if boundaries != forks(b) {
        return false;
    }
    for feature in FEATURES {
        let va = normalize((feature.get)(a));
        let vb = normalize((feature.get)(b));
        match feature.kind {
            FeatureKind::Time => {
                if va != vb {
                    return false;
                }
            }
            FeatureKind::Block => {
                for &boundary in &boundaries {
                    if is_enabled(va, boundary) != is_enabled(vb, boundary) {
                        return false;
                    }
                }
            }
        }
    }
    for &boundary in &boundaries {
        if a.bomb_delay_sum(boundary) != b.bomb_delay_sum(boundary)
            || a.block_reward_at(boundary) != b.block_reward_at(boundary)
        {
            return false;
        }
    }
    true
}

/// A stored and a proposed configuration disagree about history the local
/// chain has already passed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "mismatching {feature} in database (have {stored:?}, want {new:?}, rewind to {rewind_to})"
)]
pub struct ConfigCompatError {
    pub feature: String,
    pub stored: Option<u64>,
    pub new: Option<u64>,
    /// Highest block at which both configurations still agree.
    pub rewind_to: u64,
}

/// Checks that `new` may replace `stored` given a chain synced to `head`.
///
/// Changing a transition is fine while it still lies in the future for
/// both configurations; once either side has it at or below `head`, the
/// chains have diverged and the caller must rewind.
pub fn compatible(
    head: u64,
    stored: &dyn ChainConfig,
    new: &dyn ChainConfig,
) -> Result<(), ConfigCompatError> {
    for feature in FEATURES {
        if feature.kind != FeatureKind::Block || is_reorg_arbiter(feature.name) {
            continue;
        }
        let vs = normalize((feature.get)(stored));
        let vn = normalize((feature.get)(new));
        if vs == vn {
            continue;
        }
        if is_enabled(vs, head) || is_enabled(vn, head) {
            let rewind_to = match (vs, vn) {
                (Some(a), Some(b)) => a.min(b).saturating_sub(1),
                (Some(a), None) | (None, Some(a)) => a.saturating_sub(1),
                (None, None) => 0,
            };
            return Err(ConfigCompatError {
                feature: feature.name.to_string(),
                stored: vs,
                new: vn,
                rewind_to,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{FeatureConfig, ForkConfig};
    use super::*;

    #[test]
    fn mainnet_fork_boundaries() {
        let boundaries = forks(&FeatureConfig::mainnet());
        assert_eq!(
            boundaries,
            vec![
                1_150_000, 1_920_000, 2_463_000, 2_675_000, 4_370_000, 7_280_000, 9_200_000,
                12_965_000, 13_773_000, 15_050_000,
            ]
        );
    }

    #[test]
    fn sentinels_and_arbiters_carry_no_boundary() {
        let mut config = FeatureConfig::mainnet();
        config.eip4895_f_block = Some(u64::MAX);
        config.ecbp1100_f_block = Some(10);
        assert_eq!(forks(&config), forks(&FeatureConfig::mainnet()));
    }

    #[test]
    fn dialects_of_the_same_chain_are_equivalent() {
        assert!(equivalent(&ForkConfig::mainnet(), &FeatureConfig::mainnet()));
        assert!(!equivalent(
            &ForkConfig::mainnet(),
            &FeatureConfig::classic()
        ));
    }

    #[test]
    fn future_transition_may_move() {
        let stored = FeatureConfig::mainnet();
        let mut new = FeatureConfig::mainnet();
        new.eip1559_f_block = Some(13_000_000);
        // head well before London on both sides
        assert_eq!(compatible(9_000_000, &stored, &new), Ok(()));
    }

    #[test]
    fn passed_transition_must_not_move() {
        let stored = FeatureConfig::mainnet();
        let mut new = FeatureConfig::mainnet();
        new.eip155_block = Some(2_700_000);
        let err = compatible(9_000_000, &stored, &new).expect_err("EIP-155 already active");
        assert_eq!(err.feature, "eip155Block");
        assert_eq!(err.stored, Some(2_675_000));
        assert_eq!(err.new, Some(2_700_000));
        assert_eq!(err.rewind_to, 2_674_999);
    }

    #[test]
    fn removing_a_passed_transition_is_incompatible() {
        let stored = FeatureConfig::mainnet();
        let mut new = FeatureConfig::mainnet();
        new.eip779_f_block = None;
        let err = compatible(2_000_000, &stored, &new).expect_err("DAO fork already active");
        assert_eq!(err.rewind_to, 1_919_999);
    }
}
