use std::sync::atomic::{AtomicBool, Ordering};

use ethereum_types::{Address, H256, U256};
use polyeth_common::config::ChainConfig;
use polyeth_common::types::{Block, BlockHash, BlockHeader};
use rayon::prelude::*;

use crate::error::ConsensusError;

/// Read access to the locally known header chain. Implemented by the block
/// importer; the engines never write through it.
pub trait ChainHeaderReader: Sync {
    fn config(&self) -> &dyn ChainConfig;
    fn current_header(&self) -> Option<BlockHeader>;
    fn header(&self, hash: BlockHash, number: u64) -> Option<BlockHeader>;
    fn header_by_number(&self, number: u64) -> Option<BlockHeader>;
    fn header_by_hash(&self, hash: BlockHash) -> Option<BlockHeader>;
}

/// Mutable account balances, the only state surface `finalize` touches.
pub trait State {
    fn balance(&self, address: Address) -> U256;
    fn add_balance(&mut self, address: Address, amount: U256);
    fn set_balance(&mut self, address: Address, amount: U256);
}

/// A consensus engine as consumed by the block importer.
pub trait Engine: Send + Sync {
    /// The address that produced the block. Proof-of-work reads the
    /// coinbase; proof-of-authority recovers the sealer from the signature.
    fn author(&self, header: &BlockHeader) -> Result<Address, ConsensusError>;

    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        seal: bool,
    ) -> Result<(), ConsensusError>;

    /// Verifies a batch of headers concurrently. Results come back in input
    /// order regardless of completion order; `abort` stops outstanding work
    /// at the next header boundary, and aborted slots report
    /// [`ConsensusError::Aborted`].
    ///
    /// Headers are assumed contiguous: each one's parent is the previous
    /// element, with the first looked up through `chain`.
    fn verify_headers(
        &self,
        chain: &dyn ChainHeaderReader,
        headers: &[BlockHeader],
        seals: &[bool],
        abort: &AtomicBool,
    ) -> Vec<Result<(), ConsensusError>> {
        headers
            .par_iter()
            .enumerate()
            .map(|(i, header)| {
                if abort.load(Ordering::Relaxed) {
                    return Err(ConsensusError::Aborted);
                }
                let seal = seals.get(i).copied().unwrap_or(false);
                self.verify_header_in_batch(chain, headers, i, header, seal)
            })
            .collect()
    }

    /// Verifies one header of a batch, resolving its parent from the
    /// preceding slice element when possible. Engines override this to
    /// avoid re-reading ancestors the batch already carries.
    fn verify_header_in_batch(
        &self,
        chain: &dyn ChainHeaderReader,
        headers: &[BlockHeader],
        index: usize,
        header: &BlockHeader,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        let _ = (headers, index);
        self.verify_header(chain, header, seal)
    }

    fn verify_uncles(
        &self,
        chain: &dyn ChainHeaderReader,
        block: &Block,
    ) -> Result<(), ConsensusError>;

    /// Initializes the consensus fields of a header being produced on top
    /// of the current chain (difficulty for Ethash, difficulty and vote
    /// slots for Clique).
    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut BlockHeader,
    ) -> Result<(), ConsensusError>;

    /// Applies end-of-block state mutations: block and uncle rewards, and
    /// any one-time fork transfers.
    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        state: &mut dyn State,
        uncles: &[BlockHeader],
    );

    fn calc_difficulty(
        &self,
        chain: &dyn ChainHeaderReader,
        time: u64,
        parent: &BlockHeader,
    ) -> Result<U256, ConsensusError>;

    /// The hash the sealer signs or mines over.
    fn seal_hash(&self, header: &BlockHeader) -> H256;
}

/// Wall-clock seconds since the Unix epoch, for future-block checks.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Resolves the parent of `headers[index]`: the preceding batch element if
/// it links up, otherwise a chain lookup.
pub(crate) fn batch_parent(
    chain: &dyn ChainHeaderReader,
    headers: &[BlockHeader],
    index: usize,
    header: &BlockHeader,
) -> Option<BlockHeader> {
    if index > 0 {
        let prev = &headers[index - 1];
        if prev.hash() == header.parent_hash && prev.number + 1 == header.number {
            return Some(prev.clone());
        }
    }
    chain.header(
        header.parent_hash,
        header.number.checked_sub(1)?,
    )
}
