//! Clique proof-of-authority engine (EIP-225).
//!
//! Authorized signers take turns sealing blocks by signing the header in
//! the last 65 bytes of the extra-data. Membership changes are voted on
//! through the coinbase/nonce fields and tracked by [`snapshot::Snapshot`].
//! Ties between equally heavy forks are settled by the EIP-3436 rules.

pub mod snapshot;

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use lru::LruCache;
use polyeth_common::config::{CliqueParams, is_enabled};
use polyeth_common::constants::MAX_GAS_LIMIT;
use polyeth_common::types::{Block, BlockHeader, keccak};
use polyeth_rlp::structs::Encoder;
use tracing::debug;

use crate::eip1559::{verify_eip1559_header, verify_gas_limit};
use crate::engine::{ChainHeaderReader, Engine, State, unix_now};
use crate::error::ConsensusError;
use snapshot::Snapshot;

/// Fixed prefix of the extra-data reserved for signer vanity.
pub const EXTRA_VANITY: usize = 32;
/// Secp256k1 signature suffix of the extra-data: r || s || v.
pub const EXTRA_SEAL: usize = 65;

/// Nonce of a block voting to authorize its coinbase as a signer.
pub const NONCE_AUTH: u64 = u64::MAX;
/// Nonce of a block voting to drop its coinbase from the signer set.
pub const NONCE_DROP: u64 = 0;

/// Difficulty of a block sealed by the expected in-turn signer.
pub const DIFF_IN_TURN: U256 = U256([2, 0, 0, 0]);
/// Difficulty of a block sealed out of turn.
pub const DIFF_NO_TURN: U256 = U256([1, 0, 0, 0]);

const SNAPSHOT_CACHE_SIZE: usize = 128;
const SIGNATURE_CACHE_SIZE: usize = 4096;

/// The digest a signer seals: the header RLP with the 65-byte signature
/// suffix stripped from the extra-data. Unlike proof-of-work the mix
/// digest and nonce stay in, since they carry vote information.
pub fn seal_hash(header: &BlockHeader) -> H256 {
    let cut = header.extra_data.len().saturating_sub(EXTRA_SEAL);
    let extra = header.extra_data.slice(..cut);
    let mut buf = Vec::new();
    Encoder::new(&mut buf)
        .encode_field(&header.parent_hash)
        .encode_field(&header.ommers_hash)
        .encode_field(&header.coinbase)
        .encode_field(&header.state_root)
        .encode_field(&header.transactions_root)
        .encode_field(&header.receipts_root)
        .encode_field(&header.logs_bloom)
        .encode_field(&header.difficulty)
        .encode_field(&header.number)
        .encode_field(&header.gas_limit)
        .encode_field(&header.gas_used)
        .encode_field(&header.timestamp)
        .encode_field(&extra)
        .encode_field(&header.mix_digest)
        .encode_field(&header.nonce.to_be_bytes())
        .encode_optional_field(&header.base_fee_per_gas)
        .encode_optional_field(&header.withdrawals_root)
        .encode_optional_field(&header.blob_gas_used)
        .encode_optional_field(&header.excess_blob_gas)
        .encode_optional_field(&header.parent_beacon_block_root)
        .finish();
    keccak(&buf)
}

/// Signer list embedded between the vanity and the seal of a checkpoint
/// header's extra-data.
fn checkpoint_signers(header: &BlockHeader) -> Vec<Address> {
    let extra = &header.extra_data;
    let end = extra.len().saturating_sub(EXTRA_SEAL);
    let start = EXTRA_VANITY.min(end);
    extra[start..end]
        .chunks_exact(20)
        .map(Address::from_slice)
        .collect()
}

/// A block hash as an unsigned 256-bit integer, for the lowest-hash rule.
fn hash_value(hash: H256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Which of two competing, equally heavy heads the importer should keep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkChoice {
    First,
    Second,
}

pub struct Clique {
    params: CliqueParams,
    /// Snapshots keyed by the hash of their block.
    recents: Mutex<LruCache<H256, Arc<Snapshot>>>,
    /// Recovered sealer addresses keyed by header hash.
    signatures: Mutex<LruCache<H256, Address>>,
    /// The local sealing identity, if any.
    signer: Mutex<Option<Address>>,
}

impl Clique {
    pub fn new(params: CliqueParams) -> Clique {
        let mut params = params;
        if params.epoch == 0 {
            params.epoch = CliqueParams::default().epoch;
        }
        Clique {
            params,
            recents: Mutex::new(LruCache::new(
                NonZeroUsize::new(SNAPSHOT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
            signatures: Mutex::new(LruCache::new(
                NonZeroUsize::new(SIGNATURE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
            signer: Mutex::new(None),
        }
    }

    /// Registers the local account to seal (and vote) with.
    pub fn authorize(&self, signer: Address) {
        *lock(&self.signer) = Some(signer);
    }

    /// Recovers the sealer of a header from its extra-data signature.
    fn ecrecover(&self, header: &BlockHeader) -> Result<Address, ConsensusError> {
        let hash = header.hash();
        if let Some(signer) = lock(&self.signatures).get(&hash).copied() {
            return Ok(signer);
        }
        let extra = &header.extra_data;
        if extra.len() < EXTRA_SEAL {
            return Err(ConsensusError::MissingSignature);
        }
        let sig = &extra[extra.len() - EXTRA_SEAL..];

        let recovery_id = secp256k1::ecdsa::RecoveryId::from_i32(sig[64] as i32)?;
        let signature =
            secp256k1::ecdsa::RecoverableSignature::from_compact(&sig[..64], recovery_id)?;
        let message = secp256k1::Message::from_digest(seal_hash(header).0);
        let public_key = secp256k1::SECP256K1.recover_ecdsa(&message, &signature)?;

        let digest = keccak(&public_key.serialize_uncompressed()[1..]);
        let signer = Address::from_slice(&digest.as_bytes()[12..]);
        lock(&self.signatures).put(hash, signer);
        Ok(signer)
    }

    /// The authorization snapshot at block (`number`, `hash`). Walks the
    /// chain backwards to a cached snapshot or a checkpoint and replays
    /// the headers in between. `parents` supplies not-yet-imported
    /// ancestors, youngest last.
    fn snapshot(
        &self,
        chain: &dyn ChainHeaderReader,
        mut number: u64,
        mut hash: H256,
        mut parents: &[BlockHeader],
    ) -> Result<Arc<Snapshot>, ConsensusError> {
        let epoch = self.params.epoch;
        let mut headers: Vec<BlockHeader> = Vec::new();

        let snap: Arc<Snapshot> = loop {
            if let Some(snap) = lock(&self.recents).get(&hash).cloned() {
                break snap;
            }
            // Genesis, or a checkpoint with no reachable earlier state,
            // anchors the walk with its embedded signer list.
            let anchored = number == 0
                || (number % epoch == 0
                    && parents.is_empty()
                    && chain.header_by_number(number - 1).is_none());
            if anchored {
                let checkpoint = chain
                    .header(hash, number)
                    .ok_or(ConsensusError::UnknownAncestor)?;
                let signers = checkpoint_signers(&checkpoint);
                if signers.is_empty() {
                    return Err(ConsensusError::InvalidCheckpointSigners);
                }
                debug!(number, "anchored voting snapshot at checkpoint");
                break Arc::new(Snapshot::new(number, hash, signers));
            }
            // Walk one block back, preferring the caller-supplied batch.
            let header = if let Some((last, rest)) = parents.split_last() {
                if last.hash() != hash || last.number != number {
                    return Err(ConsensusError::UnknownAncestor);
                }
                parents = rest;
                last.clone()
            } else {
                chain
                    .header(hash, number)
                    .ok_or(ConsensusError::UnknownAncestor)?
            };
            hash = header.parent_hash;
            number = number
                .checked_sub(1)
                .ok_or(ConsensusError::UnknownAncestor)?;
            headers.push(header);
        };

        let snap = if headers.is_empty() {
            snap
        } else {
            headers.reverse();
            Arc::new(snap.apply(&headers, epoch, |h| self.ecrecover(h))?)
        };
        lock(&self.recents).put(snap.hash, Arc::clone(&snap));
        Ok(snap)
    }

    /// Context-free header shape rules, then the parent-dependent ones.
    fn verify_header_inner(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        parents: &[BlockHeader],
        unix_now: u64,
    ) -> Result<(), ConsensusError> {
        // No grace window under proof-of-authority: block times are
        // scheduled, a future stamp is always invalid.
        if header.timestamp > unix_now {
            return Err(ConsensusError::FutureBlock);
        }
        let number = header.number;
        let checkpoint = number % self.params.epoch == 0;

        if checkpoint && header.coinbase != Address::zero() {
            return Err(ConsensusError::InvalidCheckpointBeneficiary);
        }
        if header.nonce != NONCE_AUTH && header.nonce != NONCE_DROP {
            return Err(ConsensusError::InvalidVote);
        }
        if checkpoint && header.nonce != NONCE_DROP {
            return Err(ConsensusError::InvalidCheckpointVote);
        }
        if header.extra_data.len() < EXTRA_VANITY {
            return Err(ConsensusError::MissingVanity);
        }
        if header.extra_data.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(ConsensusError::MissingSignature);
        }
        let signers_bytes = header.extra_data.len() - EXTRA_VANITY - EXTRA_SEAL;
        if !checkpoint && signers_bytes != 0 {
            return Err(ConsensusError::ExtraSigners);
        }
        if checkpoint && signers_bytes % 20 != 0 {
            return Err(ConsensusError::InvalidCheckpointSigners);
        }
        if header.mix_digest != H256::zero() {
            return Err(ConsensusError::InvalidCliqueMixDigest);
        }
        if header.has_ommers() {
            return Err(ConsensusError::CliqueUnclesNotAllowed);
        }
        if number > 0 && header.difficulty != DIFF_IN_TURN && header.difficulty != DIFF_NO_TURN {
            return Err(ConsensusError::WrongDifficulty);
        }
        // Post-merge fields never appear under proof-of-authority.
        if header.withdrawals_root.is_some() {
            return Err(ConsensusError::UnexpectedField("withdrawalsRoot"));
        }
        if header.blob_gas_used.is_some() {
            return Err(ConsensusError::UnexpectedField("blobGasUsed"));
        }
        if header.excess_blob_gas.is_some() {
            return Err(ConsensusError::UnexpectedField("excessBlobGas"));
        }
        if header.parent_beacon_block_root.is_some() {
            return Err(ConsensusError::UnexpectedField("parentBeaconBlockRoot"));
        }

        self.verify_cascading_fields(chain, header, parents)
    }

    fn verify_cascading_fields(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        parents: &[BlockHeader],
    ) -> Result<(), ConsensusError> {
        let number = header.number;
        if number == 0 {
            return Ok(());
        }
        let parent = match parents.last() {
            Some(parent) => parent.clone(),
            None => chain
                .header(header.parent_hash, number - 1)
                .ok_or(ConsensusError::UnknownAncestor)?,
        };
        if parent.hash() != header.parent_hash || parent.number + 1 != number {
            return Err(ConsensusError::UnknownAncestor);
        }
        if parent.timestamp + self.params.period > header.timestamp {
            return Err(ConsensusError::InvalidTimestamp);
        }
        if header.gas_limit > MAX_GAS_LIMIT {
            return Err(ConsensusError::InvalidGasLimit(format!(
                "have {}, max {MAX_GAS_LIMIT}",
                header.gas_limit
            )));
        }
        if header.gas_used > header.gas_limit {
            return Err(ConsensusError::InvalidGasUsed {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }
        let config = chain.config();
        if is_enabled(config.get_eip1559_transition(), number) {
            verify_eip1559_header(config, &parent, header)?;
        } else {
            if header.base_fee_per_gas.is_some() {
                return Err(ConsensusError::UnexpectedField("baseFeePerGas"));
            }
            verify_gas_limit(parent.gas_limit, header.gas_limit)?;
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;
        if number % self.params.epoch == 0 && checkpoint_signers(header) != snap.signer_list() {
            return Err(ConsensusError::InvalidCheckpointSigners);
        }
        self.verify_seal(&snap, header)
    }

    /// Checks the sealer against the authorization snapshot: they must be
    /// a signer, outside the recency window, and claim the right turn.
    fn verify_seal(&self, snap: &Snapshot, header: &BlockHeader) -> Result<(), ConsensusError> {
        if header.number == 0 {
            return Err(ConsensusError::UnknownBlock);
        }
        let signer = self.ecrecover(header)?;
        if !snap.signers.contains(&signer) {
            return Err(ConsensusError::UnauthorizedSigner);
        }
        let limit = snap.signers.len() as u64 / 2 + 1;
        for (&sealed, &recent) in &snap.recents {
            if recent == signer {
                // Only refuse if the current block doesn't shift the
                // earlier one out of the recency window.
                if let Some(boundary) = header.number.checked_sub(limit) {
                    if sealed > boundary {
                        return Err(ConsensusError::RecentlySigned);
                    }
                }
            }
        }
        let inturn = snap.inturn(header.number, signer);
        if inturn && header.difficulty != DIFF_IN_TURN {
            return Err(ConsensusError::WrongDifficulty);
        }
        if !inturn && header.difficulty != DIFF_NO_TURN {
            return Err(ConsensusError::WrongDifficulty);
        }
        Ok(())
    }

    /// EIP-3436 tie-break between two valid heads of equal total
    /// difficulty. Lower block number wins outright; equal-height heads
    /// go to the sealer whose in-turn slot is furthest in the past, and
    /// finally to the lower head hash. Deterministic in either argument
    /// order, so import order cannot sway the outcome.
    pub fn choose_head(
        &self,
        chain: &dyn ChainHeaderReader,
        first: &BlockHeader,
        second: &BlockHeader,
    ) -> Result<ForkChoice, ConsensusError> {
        if first.number != second.number {
            return Ok(if first.number < second.number {
                ForkChoice::First
            } else {
                ForkChoice::Second
            });
        }
        let first_distance = self.inturn_distance(chain, first)?;
        let second_distance = self.inturn_distance(chain, second)?;
        match first_distance.cmp(&second_distance) {
            Ordering::Greater => Ok(ForkChoice::First),
            Ordering::Less => Ok(ForkChoice::Second),
            Ordering::Equal => {
                if hash_value(first.hash()) <= hash_value(second.hash()) {
                    Ok(ForkChoice::First)
                } else {
                    Ok(ForkChoice::Second)
                }
            }
        }
    }

    /// How many blocks ago the sealer of `header` was the in-turn signer.
    fn inturn_distance(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
    ) -> Result<u64, ConsensusError> {
        let parent_number = header
            .number
            .checked_sub(1)
            .ok_or(ConsensusError::UnknownBlock)?;
        let snap = self.snapshot(chain, parent_number, header.parent_hash, &[])?;
        let signer = self.ecrecover(header)?;
        let index = snap
            .signer_index(signer)
            .ok_or(ConsensusError::UnauthorizedSigner)? as u64;
        let count = snap.signers.len() as u64;
        Ok((header.number % count + count - index) % count)
    }
}

impl Engine for Clique {
    fn author(&self, header: &BlockHeader) -> Result<Address, ConsensusError> {
        self.ecrecover(header)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        _seal: bool,
    ) -> Result<(), ConsensusError> {
        self.verify_header_inner(chain, header, &[], unix_now())
    }

    fn verify_header_in_batch(
        &self,
        chain: &dyn ChainHeaderReader,
        headers: &[BlockHeader],
        index: usize,
        header: &BlockHeader,
        _seal: bool,
    ) -> Result<(), ConsensusError> {
        self.verify_header_inner(chain, header, &headers[..index], unix_now())
    }

    fn verify_uncles(
        &self,
        _chain: &dyn ChainHeaderReader,
        block: &Block,
    ) -> Result<(), ConsensusError> {
        if !block.body.ommers.is_empty() {
            return Err(ConsensusError::CliqueUnclesNotAllowed);
        }
        Ok(())
    }

    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut BlockHeader,
    ) -> Result<(), ConsensusError> {
        let number = header.number;
        let parent = number
            .checked_sub(1)
            .and_then(|n| chain.header(header.parent_hash, n))
            .ok_or(ConsensusError::UnknownAncestor)?;
        let snap = self.snapshot(chain, parent.number, header.parent_hash, &[])?;

        // Vote slots stay empty; proposal selection belongs to the
        // sealing frontend.
        header.coinbase = Address::zero();
        header.nonce = NONCE_DROP;

        let signer = (*lock(&self.signer)).unwrap_or_default();
        header.difficulty = if snap.inturn(number, signer) {
            DIFF_IN_TURN
        } else {
            DIFF_NO_TURN
        };

        let mut extra = header.extra_data.to_vec();
        extra.resize(EXTRA_VANITY, 0);
        if number % self.params.epoch == 0 {
            for signer in snap.signer_list() {
                extra.extend_from_slice(signer.as_bytes());
            }
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra_data = Bytes::from(extra);

        header.mix_digest = H256::zero();
        header.timestamp = (parent.timestamp + self.params.period).max(unix_now());
        Ok(())
    }

    fn finalize(
        &self,
        _chain: &dyn ChainHeaderReader,
        _header: &BlockHeader,
        _state: &mut dyn State,
        _uncles: &[BlockHeader],
    ) {
        // No block rewards under proof-of-authority.
    }

    fn calc_difficulty(
        &self,
        chain: &dyn ChainHeaderReader,
        _time: u64,
        parent: &BlockHeader,
    ) -> Result<U256, ConsensusError> {
        let snap = self.snapshot(chain, parent.number, parent.hash(), &[])?;
        let signer = (*lock(&self.signer)).unwrap_or_default();
        Ok(if snap.inturn(parent.number + 1, signer) {
            DIFF_IN_TURN
        } else {
            DIFF_NO_TURN
        })
    }

    fn seal_hash(&self, header: &BlockHeader) -> H256 {
        seal_hash(header)
    }
}
