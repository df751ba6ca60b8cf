use thiserror::Error;

use super::{ChainConfig, SetError};

/// How a feature's transition value is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    /// Activated at a block number.
    Block,
    /// Activated at a unix timestamp.
    Time,
}

/// One entry in the static feature table: a named capability with its
/// getter and setter, both working through the [`ChainConfig`] interface.
pub struct FeatureDescriptor {
    /// Canonical feature name, matching the granular JSON key.
    pub name: &'static str,
    pub kind: FeatureKind,
    pub get: fn(&dyn ChainConfig) -> Option<u64>,
    pub set: fn(&mut dyn ChainConfig, Option<u64>) -> Result<(), SetError>,
}

macro_rules! feature {
    ($name:literal, $kind:ident, $getter:ident, $setter:ident) => {
        FeatureDescriptor {
            name: $name,
            kind: FeatureKind::$kind,
            get: |c| c.$getter(),
            set: |c, v| c.$setter(v),
        }
    };
}

/// Every per-feature capability, in canonical order. Conversion and
/// comparison walk this table instead of reflecting over schema fields.
pub static FEATURES: &[FeatureDescriptor] = &[
    feature!("eip2FBlock", Block, get_eip2_transition, set_eip2_transition),
    feature!("eip7FBlock", Block, get_eip7_transition, set_eip7_transition),
    feature!(
        "eip150Block",
        Block,
        get_eip150_transition,
        set_eip150_transition
    ),
    feature!(
        "eip155Block",
        Block,
        get_eip155_transition,
        set_eip155_transition
    ),
    feature!(
        "eip160FBlock",
        Block,
        get_eip160_transition,
        set_eip160_transition
    ),
    feature!(
        "eip161FBlock",
        Block,
        get_eip161_transition,
        set_eip161_transition
    ),
    feature!(
        "eip100FBlock",
        Block,
        get_eip100b_transition,
        set_eip100b_transition
    ),
    feature!(
        "eip649FBlock",
        Block,
        get_eip649_transition,
        set_eip649_transition
    ),
    feature!(
        "eip1234FBlock",
        Block,
        get_eip1234_transition,
        set_eip1234_transition
    ),
    feature!(
        "eip2384FBlock",
        Block,
        get_eip2384_transition,
        set_eip2384_transition
    ),
    feature!(
        "eip3554FBlock",
        Block,
        get_eip3554_transition,
        set_eip3554_transition
    ),
    feature!(
        "eip4345FBlock",
        Block,
        get_eip4345_transition,
        set_eip4345_transition
    ),
    feature!(
        "eip5133FBlock",
        Block,
        get_eip5133_transition,
        set_eip5133_transition
    ),
    feature!(
        "eip779FBlock",
        Block,
        get_eip779_transition,
        set_eip779_transition
    ),
    feature!(
        "eip1559FBlock",
        Block,
        get_eip1559_transition,
        set_eip1559_transition
    ),
    feature!(
        "eip4895FBlock",
        Block,
        get_eip4895_transition,
        set_eip4895_transition
    ),
    feature!(
        "eip4895FTime",
        Time,
        get_eip4895_transition_time,
        set_eip4895_transition_time
    ),
    feature!(
        "eip4844FTime",
        Time,
        get_eip4844_transition_time,
        set_eip4844_transition_time
    ),
    feature!(
        "eip4788FTime",
        Time,
        get_eip4788_transition_time,
        set_eip4788_transition_time
    ),
    feature!(
        "ecip1010PauseBlock",
        Block,
        get_ecip1010_pause_transition,
        set_ecip1010_pause_transition
    ),
    feature!(
        "ecip1010ContinueBlock",
        Block,
        get_ecip1010_continue_transition,
        set_ecip1010_continue_transition
    ),
    feature!(
        "ecip1017FBlock",
        Block,
        get_ecip1017_transition,
        set_ecip1017_transition
    ),
    feature!(
        "ecip1017EraRounds",
        Block,
        get_ecip1017_era_rounds,
        set_ecip1017_era_rounds
    ),
    feature!(
        "ecip1041Block",
        Block,
        get_ecip1041_transition,
        set_ecip1041_transition
    ),
    feature!(
        "ecip1099FBlock",
        Block,
        get_ecip1099_transition,
        set_ecip1099_transition
    ),
    feature!(
        "ecbp1100FBlock",
        Block,
        get_ecbp1100_transition,
        set_ecbp1100_transition
    ),
    feature!(
        "mcip3Block",
        Block,
        get_mcip3_transition,
        set_mcip3_transition
    ),
    feature!(
        "mcip8Block",
        Block,
        get_mcip8_transition,
        set_mcip8_transition
    ),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// The destination schema cannot hold a non-default value the source
    /// carries. Lossy conversion is never performed silently.
    #[error("destination schema cannot represent {feature}={value}")]
    UnsupportedFatal { feature: String, value: u64 },
}

/// Copies every capability of `src` into `dst`, feature by feature.
///
/// A setter reporting [`SetError::UnsupportedNoop`] is skipped: the value
/// was a default and dropping it changes nothing. A fatal setter aborts
/// the conversion; `dst` may be partially written in that case.
pub fn convert(src: &dyn ChainConfig, dst: &mut dyn ChainConfig) -> Result<(), ConvertError> {
    for feature in FEATURES {
        let value = (feature.get)(src);
        match (feature.set)(dst, value) {
            Ok(()) | Err(SetError::UnsupportedNoop) => {}
            Err(SetError::UnsupportedFatal) => {
                return Err(ConvertError::UnsupportedFatal {
                    feature: feature.name.to_string(),
                    value: value.unwrap_or_default(),
                });
            }
        }
    }
    // Schedules travel as whole maps, outside the scalar table.
    if dst
        .set_difficulty_bomb_delays(src.get_difficulty_bomb_delays())
        .is_err()
    {
        return Err(ConvertError::UnsupportedFatal {
            feature: "difficultyBombDelays".to_string(),
            value: 0,
        });
    }
    if dst.set_block_rewards(src.get_block_rewards()).is_err() {
        return Err(ConvertError::UnsupportedFatal {
            feature: "blockReward".to_string(),
            value: 0,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{FeatureConfig, ForkConfig, equivalent};
    use super::*;

    #[test]
    fn table_names_are_unique() {
        for (i, a) in FEATURES.iter().enumerate() {
            for b in &FEATURES[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn fork_mainnet_converts_to_granular() {
        let src = ForkConfig::mainnet();
        let mut dst = FeatureConfig::default();
        convert(&src, &mut dst).expect("mainnet converts losslessly");

        assert_eq!(dst.get_eip2_transition(), Some(1_150_000));
        assert_eq!(dst.get_eip100b_transition(), Some(4_370_000));
        assert_eq!(dst.get_eip649_transition(), Some(4_370_000));
        assert_eq!(dst.get_eip2384_transition(), Some(9_200_000));
        assert_eq!(dst.get_eip5133_transition(), Some(15_050_000));
        assert_eq!(dst.get_eip779_transition(), Some(1_920_000));
        assert!(equivalent(&src, &dst));
    }

    #[test]
    fn granular_mainnet_converts_to_fork() {
        let src = FeatureConfig::mainnet();
        let mut dst = ForkConfig::default();
        convert(&src, &mut dst).expect("mainnet converts losslessly");

        assert_eq!(dst.byzantium_block, Some(4_370_000));
        assert_eq!(dst.constantinople_block, Some(7_280_000));
        assert_eq!(dst.gray_glacier_block, Some(15_050_000));
        assert_eq!(dst.dao_fork_block, Some(1_920_000));
        assert!(dst.dao_fork_support);
        assert_eq!(dst.shanghai_time, Some(1_681_338_455));
    }

    #[test]
    fn classic_does_not_fit_the_fork_schema() {
        let src = FeatureConfig::classic();
        let mut dst = ForkConfig::default();
        // classic splits EIP-160 and EIP-161 across different blocks, which
        // the shared eip158Block slot cannot hold
        let err = convert(&src, &mut dst).expect_err("classic cannot be represented");
        assert_eq!(
            err,
            ConvertError::UnsupportedFatal {
                feature: "eip161FBlock".to_string(),
                value: 8_772_000,
            }
        );
    }

    #[test]
    fn roundtrip_preserves_equivalence() {
        let src = ForkConfig::mainnet();
        let mut granular = FeatureConfig::default();
        convert(&src, &mut granular).expect("forward");
        let mut back = ForkConfig::default();
        convert(&granular, &mut back).expect("backward");
        assert!(equivalent(&src, &back));
    }
}
