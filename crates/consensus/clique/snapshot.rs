//! Voting snapshot of the authorized signer set at a given block.
//!
//! A snapshot is immutable once built. Advancing the chain produces a new
//! snapshot by replaying headers on a copy; concurrent readers share the
//! previous one through an `Arc`.

use std::collections::{BTreeMap, BTreeSet};

use ethereum_types::{Address, H256};
use polyeth_common::types::BlockHeader;

use super::{NONCE_AUTH, NONCE_DROP};
use crate::error::ConsensusError;

/// A pending proposal cast by an authorized signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub signer: Address,
    pub block: u64,
    pub address: Address,
    pub authorize: bool,
}

/// Running vote count for one proposed address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tally {
    pub authorize: bool,
    pub votes: usize,
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Block number the snapshot describes.
    pub number: u64,
    /// Hash of that block.
    pub hash: H256,
    /// Authorized signers, ordered by address.
    pub signers: BTreeSet<Address>,
    /// Recent sealers keyed by the block they sealed.
    pub recents: BTreeMap<u64, Address>,
    /// Pending votes in casting order.
    pub votes: Vec<Vote>,
    /// Current tally per proposed address.
    pub tally: BTreeMap<Address, Tally>,
}

impl Snapshot {
    pub fn new(number: u64, hash: H256, signers: impl IntoIterator<Item = Address>) -> Snapshot {
        Snapshot {
            number,
            hash,
            signers: signers.into_iter().collect(),
            recents: BTreeMap::new(),
            votes: Vec::new(),
            tally: BTreeMap::new(),
        }
    }

    /// The signer list sorted ascending by address.
    pub fn signer_list(&self) -> Vec<Address> {
        self.signers.iter().copied().collect()
    }

    /// Position of `signer` in the sorted signer list.
    pub fn signer_index(&self, signer: Address) -> Option<usize> {
        self.signers.iter().position(|s| *s == signer)
    }

    /// Whether `signer` is the expected sealer of block `number`.
    pub fn inturn(&self, number: u64, signer: Address) -> bool {
        match self.signer_index(signer) {
            Some(index) => number % self.signers.len() as u64 == index as u64,
            None => false,
        }
    }

    /// Whether `signer` sealed one of the tracked recent blocks.
    pub fn recently_signed(&self, signer: Address) -> bool {
        self.recents.values().any(|r| *r == signer)
    }

    /// A vote is meaningful only if it would change the signer set.
    fn valid_vote(&self, address: Address, authorize: bool) -> bool {
        if self.signers.contains(&address) {
            !authorize
        } else {
            authorize
        }
    }

    fn cast(&mut self, address: Address, authorize: bool) -> bool {
        if !self.valid_vote(address, authorize) {
            return false;
        }
        self.tally
            .entry(address)
            .and_modify(|t| t.votes += 1)
            .or_insert(Tally {
                authorize,
                votes: 1,
            });
        true
    }

    fn uncast(&mut self, address: Address, authorize: bool) {
        let Some(tally) = self.tally.get_mut(&address) else {
            return;
        };
        if tally.authorize != authorize {
            return;
        }
        if tally.votes > 1 {
            tally.votes -= 1;
        } else {
            self.tally.remove(&address);
        }
    }

    /// Replays `headers` on top of this snapshot, producing the snapshot of
    /// the last header. Headers must be contiguous and start right after
    /// the snapshot's block.
    pub fn apply<F>(
        &self,
        headers: &[BlockHeader],
        epoch: u64,
        recover: F,
    ) -> Result<Snapshot, ConsensusError>
    where
        F: Fn(&BlockHeader) -> Result<Address, ConsensusError>,
    {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(ConsensusError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(ConsensusError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;

            // Epoch checkpoints wipe all pending proposals.
            if number % epoch == 0 {
                snap.votes.clear();
                snap.tally.clear();
            }
            // Expire the sealer that falls out of the recency window.
            let limit = snap.signers.len() as u64 / 2 + 1;
            if number >= limit {
                snap.recents.remove(&(number - limit));
            }

            let signer = recover(header)?;
            if !snap.signers.contains(&signer) {
                return Err(ConsensusError::UnauthorizedSigner);
            }
            if snap.recently_signed(signer) {
                return Err(ConsensusError::RecentlySigned);
            }
            snap.recents.insert(number, signer);

            // A fresh vote from a signer discards their previous one for
            // the same address.
            if let Some(pos) = snap
                .votes
                .iter()
                .position(|v| v.signer == signer && v.address == header.coinbase)
            {
                let old = snap.votes.remove(pos);
                snap.uncast(old.address, old.authorize);
            }

            let authorize = match header.nonce {
                NONCE_AUTH => true,
                NONCE_DROP => false,
                _ => return Err(ConsensusError::InvalidVote),
            };
            if snap.cast(header.coinbase, authorize) {
                snap.votes.push(Vote {
                    signer,
                    block: number,
                    address: header.coinbase,
                    authorize,
                });
            }

            // A majority settles the proposal.
            let decided = snap
                .tally
                .get(&header.coinbase)
                .is_some_and(|t| t.votes > snap.signers.len() / 2);
            if decided {
                let authorize = snap.tally[&header.coinbase].authorize;
                if authorize {
                    snap.signers.insert(header.coinbase);
                } else {
                    snap.signers.remove(&header.coinbase);

                    // The signer set shrank; shrink the recency window too.
                    let limit = snap.signers.len() as u64 / 2 + 1;
                    if number >= limit {
                        snap.recents.remove(&(number - limit));
                    }
                    // Deauthorized signers lose their pending votes.
                    let mut i = 0;
                    while i < snap.votes.len() {
                        if snap.votes[i].signer == header.coinbase {
                            let old = snap.votes.remove(i);
                            snap.uncast(old.address, old.authorize);
                        } else {
                            i += 1;
                        }
                    }
                }
                // Either way, votes about the settled address are moot.
                snap.votes.retain(|v| v.address != header.coinbase);
                snap.tally.remove(&header.coinbase);
            }
        }

        snap.number += headers.len() as u64;
        snap.hash = headers[headers.len() - 1].hash();
        Ok(snap)
    }
}
