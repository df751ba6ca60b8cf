use ethereum_types::U256;
use thiserror::Error;

/// Why the Ethash cache/DAG store rejected or regenerated an on-disk dump.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid dump magic")]
    InvalidDumpMagic,
    #[error("dump file too short")]
    TruncatedDump,
    #[error("cache with hash {0} has been flagged as bad")]
    BadCache(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A header or block failed consensus validation.
#[derive(Debug, Error)]
pub enum ConsensusError {
    // Shared header checks
    #[error("unknown ancestor")]
    UnknownAncestor,
    #[error("block in the future")]
    FutureBlock,
    #[error("timestamp older than parent")]
    OlderBlockTime,
    #[error("invalid difficulty: have {got}, want {expected}")]
    InvalidDifficulty { expected: U256, got: U256 },
    #[error("difficulty exceeds 256 bits")]
    DifficultyOverflow,
    #[error("extra-data too long: {0} > {1}")]
    ExtraDataTooLong(usize, usize),
    #[error("invalid block number: have {got}, want {expected}")]
    InvalidNumber { expected: u64, got: u64 },
    #[error("invalid gas limit: {0}")]
    InvalidGasLimit(String),
    #[error("invalid gas used: have {used}, limit {limit}")]
    InvalidGasUsed { used: u64, limit: u64 },
    #[error("header is missing its {0} field")]
    MissingField(&'static str),
    #[error("header carries {0} before the fork that defines it")]
    UnexpectedField(&'static str),
    #[error("invalid base fee: have {got}, want {expected}")]
    InvalidBaseFee { expected: u64, got: u64 },
    #[error("DAO pro-fork extra-data mismatch")]
    InvalidDaoExtraData,

    // Ethash seal
    #[error("invalid mix digest")]
    InvalidMixDigest,
    #[error("invalid proof-of-work")]
    InvalidProofOfWork,
    #[error("non-positive difficulty")]
    NonPositiveDifficulty,

    // Uncles
    #[error("too many uncles")]
    TooManyUncles,
    #[error("duplicate uncle")]
    DuplicateUncle,
    #[error("uncle is ancestor")]
    UncleIsAncestor,
    #[error("uncle's parent is not ancestor")]
    DanglingUncle,
    #[error("uncle root mismatch")]
    InvalidUncleHash,

    // Clique
    #[error("signer recently signed")]
    RecentlySigned,
    #[error("unauthorized signer")]
    UnauthorizedSigner,
    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,
    #[error("extra-data 65 byte signature suffix missing")]
    MissingSignature,
    #[error("non-checkpoint block contains extra signer list")]
    ExtraSigners,
    #[error("beneficiary set on checkpoint block")]
    InvalidCheckpointBeneficiary,
    #[error("vote nonce set on checkpoint block")]
    InvalidCheckpointVote,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("invalid signer list on checkpoint block")]
    InvalidCheckpointSigners,
    #[error("invalid mix digest for proof-of-authority")]
    InvalidCliqueMixDigest,
    #[error("uncles not allowed in proof-of-authority")]
    CliqueUnclesNotAllowed,
    #[error("invalid vote nonce")]
    InvalidVote,
    #[error("out-of-range or non-contiguous headers for voting")]
    InvalidVotingChain,
    #[error("invalid proof-of-authority difficulty")]
    WrongDifficulty,
    #[error("unknown block")]
    UnknownBlock,
    #[error("signature recovery failed: {0}")]
    SignatureRecovery(#[from] secp256k1::Error),

    // Batch verification
    #[error("verification aborted")]
    Aborted,

    // Environment
    #[error(transparent)]
    Store(#[from] StoreError),
}
