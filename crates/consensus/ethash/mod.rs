//! Ethash proof-of-work engine.

pub mod algorithm;
pub mod difficulty;
pub mod store;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use once_cell::sync::Lazy;
use polyeth_common::config::{ChainConfig, is_enabled, is_enabled_by_time};
use polyeth_common::constants::{
    ALLOWED_FUTURE_BLOCK_TIME, MAX_GAS_LIMIT, MAXIMUM_EXTRA_DATA_SIZE,
};
use polyeth_common::types::{Block, BlockHeader};
use tracing::debug;

use crate::dao;
use crate::eip1559::{verify_eip1559_header, verify_gas_limit};
use crate::engine::{ChainHeaderReader, Engine, State, batch_parent, unix_now};
use crate::error::ConsensusError;
use crate::rewards;

use algorithm::{
    calc_epoch, calc_epoch_length, dataset_size, hashimoto_full, hashimoto_light,
};
use store::{Cache, Dataset, EpochLru, StoreConfig, TEST_DATASET_BYTES};

/// How much of the proof-of-work machinery is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PowMode {
    /// Full verification with production cache sizes.
    #[default]
    Normal,
    /// Delegate cache ownership to the process-wide shared instance.
    Shared,
    /// Tiny caches and datasets for unit tests.
    Test,
    /// Accept any seal; all other header rules still apply.
    Fake,
    /// Accept everything. Used by chain-building test harnesses.
    FullFake,
}

#[derive(Clone, Debug, Default)]
pub struct EthashConfig {
    pub cache: StoreConfig,
    pub dataset: StoreConfig,
    pub pow_mode: PowMode,
}

/// Process-wide instance backing `PowMode::Shared` engines, so light
/// clients spun up in parallel share one set of verification caches.
static SHARED: Lazy<Arc<Ethash>> = Lazy::new(|| {
    Arc::new(Ethash::new(EthashConfig {
        cache: StoreConfig {
            in_mem: 3,
            ..StoreConfig::default()
        },
        ..EthashConfig::default()
    }))
});

pub struct Ethash {
    config: EthashConfig,
    caches: EpochLru<Cache>,
    datasets: EpochLru<Dataset>,
}

impl Ethash {
    pub fn new(config: EthashConfig) -> Ethash {
        Ethash {
            caches: EpochLru::new("cache", config.cache.in_mem, store::new_cache),
            datasets: EpochLru::new("dataset", config.dataset.in_mem, store::new_dataset),
            config,
        }
    }

    /// An engine with test-sized caches, for unit tests.
    pub fn new_tester() -> Ethash {
        Ethash::new(EthashConfig {
            pow_mode: PowMode::Test,
            ..EthashConfig::default()
        })
    }

    pub fn shared() -> Arc<Ethash> {
        SHARED.clone()
    }

    fn test_mode(&self) -> bool {
        self.config.pow_mode == PowMode::Test
    }

    /// The verification cache covering `block`, generating it if needed
    /// and kicking off background generation of the next epoch's cache.
    pub fn cache(&self, block: u64, ecip1099_block: Option<u64>) -> Arc<Cache> {
        if self.config.pow_mode == PowMode::Shared {
            return Ethash::shared().cache(block, ecip1099_block);
        }
        let epoch_length = calc_epoch_length(block, ecip1099_block);
        let epoch = calc_epoch(block, epoch_length);
        let (current, future) = self.caches.get(epoch, epoch_length, ecip1099_block);

        let store = &self.config.cache;
        current.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, self.test_mode());

        if let Some(future) = future {
            let store = store.clone();
            let test = self.test_mode();
            std::thread::spawn(move || {
                future.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, test);
            });
        }
        current
    }

    /// The mining dataset covering `block`. With `background` the build
    /// runs on its own thread and callers poll [`Dataset::generated`].
    pub fn dataset(
        &self,
        block: u64,
        ecip1099_block: Option<u64>,
        background: bool,
    ) -> Arc<Dataset> {
        if self.config.pow_mode == PowMode::Shared {
            return Ethash::shared().dataset(block, ecip1099_block, background);
        }
        let epoch_length = calc_epoch_length(block, ecip1099_block);
        let epoch = calc_epoch(block, epoch_length);
        let (current, future) = self.datasets.get(epoch, epoch_length, ecip1099_block);

        // Regeneration of a deny-listed dump must finish before use.
        let background = background
            && !(epoch_length == algorithm::EPOCH_LENGTH_ECIP1099 && (epoch == 42 || epoch == 195));

        let store = self.config.dataset.clone();
        let test = self.test_mode();
        if background && !current.generated() {
            let current = current.clone();
            std::thread::spawn(move || {
                current.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, test);
                if let Some(future) = future {
                    future.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, test);
                }
            });
        } else {
            current.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, test);
            if let Some(future) = future {
                std::thread::spawn(move || {
                    future.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, test);
                });
            }
        }
        current
    }

    fn dataset_bytes(&self, epoch: u64) -> u64 {
        if self.test_mode() { TEST_DATASET_BYTES } else { dataset_size(epoch) }
    }

    /// The Ethash seal check: recompute the hashimoto mix for the header's
    /// nonce and compare digest and difficulty target.
    pub fn verify_seal(
        &self,
        config: &dyn ChainConfig,
        header: &BlockHeader,
        full: bool,
    ) -> Result<(), ConsensusError> {
        match self.config.pow_mode {
            PowMode::Fake | PowMode::FullFake => return Ok(()),
            PowMode::Shared => return Ethash::shared().verify_seal(config, header, full),
            _ => {}
        }
        if header.difficulty.is_zero() {
            return Err(ConsensusError::NonPositiveDifficulty);
        }

        let ecip1099_block = config.get_ecip1099_transition();
        let epoch_length = calc_epoch_length(header.number, ecip1099_block);
        let epoch = calc_epoch(header.number, epoch_length);
        let size = self.dataset_bytes(epoch);

        let (digest, result) = if full {
            let dataset = self.dataset(header.number, ecip1099_block, true);
            if dataset.generated() {
                let store = &self.config.dataset;
                let words = dataset.generate(
                    store.dir.as_deref(),
                    store.on_disk,
                    store.lock_mmap,
                    self.test_mode(),
                );
                hashimoto_full(words, header.seal_hash(), header.nonce)
            } else {
                // dataset still building elsewhere, fall back to light
                debug!(number = header.number, "DAG not ready, verifying seal with cache");
                self.light_hashimoto(config, header, size)
            }
        } else {
            self.light_hashimoto(config, header, size)
        };

        if digest != header.mix_digest {
            return Err(ConsensusError::InvalidMixDigest);
        }
        let target = U256::MAX / header.difficulty;
        if U256::from_big_endian(result.as_bytes()) > target {
            return Err(ConsensusError::InvalidProofOfWork);
        }
        Ok(())
    }

    fn light_hashimoto(
        &self,
        config: &dyn ChainConfig,
        header: &BlockHeader,
        size: u64,
    ) -> (H256, H256) {
        let cache = self.cache(header.number, config.get_ecip1099_transition());
        let store = &self.config.cache;
        let words = cache.generate(store.dir.as_deref(), store.on_disk, store.lock_mmap, self.test_mode());
        hashimoto_light(size, words, header.seal_hash(), header.nonce)
    }

    /// The ordered header rule set shared by block and uncle validation.
    fn verify_header_inner(
        &self,
        config: &dyn ChainConfig,
        header: &BlockHeader,
        parent: &BlockHeader,
        uncle: bool,
        seal: bool,
        unix_now: u64,
    ) -> Result<(), ConsensusError> {
        if header.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(ConsensusError::ExtraDataTooLong(
                header.extra_data.len(),
                MAXIMUM_EXTRA_DATA_SIZE,
            ));
        }
        if !uncle && header.timestamp > unix_now + ALLOWED_FUTURE_BLOCK_TIME {
            return Err(ConsensusError::FutureBlock);
        }
        if header.timestamp <= parent.timestamp {
            return Err(ConsensusError::OlderBlockTime);
        }

        let expected = difficulty::calc_difficulty(config, header.timestamp, parent)?;
        if header.difficulty != expected {
            return Err(ConsensusError::InvalidDifficulty {
                expected,
                got: header.difficulty,
            });
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

        let expected_number = parent
            .number
            .checked_add(1)
            .ok_or(ConsensusError::InvalidNumber {
                expected: u64::MAX,
                got: header.number,
            })?;
        if header.number != expected_number {
            return Err(ConsensusError::InvalidNumber {
                expected: expected_number,
                got: header.number,
            });
        }

        if is_enabled(config.get_eip1559_transition(), header.number) {
            verify_eip1559_header(config, parent, header)?;
        } else {
            if header.base_fee_per_gas.is_some() {
                return Err(ConsensusError::UnexpectedField("baseFeePerGas"));
            }
            verify_gas_limit(parent.gas_limit, header.gas_limit)?;
        }

        verify_optional_fields(config, header)?;

        if seal {
            self.verify_seal(config, header, false)?;
        }

        dao::verify_header_extra_data(config, header)?;
        Ok(())
    }
}

/// Optional trailing header fields must be present exactly when their
/// fork is active at the header's time (or block, for block-scheduled
/// chains).
fn verify_optional_fields(
    config: &dyn ChainConfig,
    header: &BlockHeader,
) -> Result<(), ConsensusError> {
    let shanghai = is_enabled_by_time(config.get_eip4895_transition_time(), header.timestamp)
        || is_enabled(config.get_eip4895_transition(), header.number);
    check_presence(shanghai, header.withdrawals_root.is_some(), "withdrawalsRoot")?;

    let cancun = is_enabled_by_time(config.get_eip4844_transition_time(), header.timestamp);
    check_presence(cancun, header.blob_gas_used.is_some(), "blobGasUsed")?;
    check_presence(cancun, header.excess_blob_gas.is_some(), "excessBlobGas")?;

    let beacon_root = is_enabled_by_time(config.get_eip4788_transition_time(), header.timestamp);
    check_presence(
        beacon_root,
        header.parent_beacon_block_root.is_some(),
        "parentBeaconBlockRoot",
    )?;
    Ok(())
}

fn check_presence(active: bool, present: bool, field: &'static str) -> Result<(), ConsensusError> {
    match (active, present) {
        (true, false) => Err(ConsensusError::MissingField(field)),
        (false, true) => Err(ConsensusError::UnexpectedField(field)),
        _ => Ok(()),
    }
}

impl Engine for Ethash {
    fn author(&self, header: &BlockHeader) -> Result<Address, ConsensusError> {
        Ok(header.coinbase)
    }

    fn verify_header(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        if self.config.pow_mode == PowMode::FullFake {
            return Ok(());
        }
        let parent = header
            .number
            .checked_sub(1)
            .and_then(|n| chain.header(header.parent_hash, n))
            .ok_or(ConsensusError::UnknownAncestor)?;
        self.verify_header_inner(chain.config(), header, &parent, false, seal, unix_now())
    }

    fn verify_header_in_batch(
        &self,
        chain: &dyn ChainHeaderReader,
        headers: &[BlockHeader],
        index: usize,
        header: &BlockHeader,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        if self.config.pow_mode == PowMode::FullFake {
            return Ok(());
        }
        let parent = batch_parent(chain, headers, index, header)
            .ok_or(ConsensusError::UnknownAncestor)?;
        self.verify_header_inner(chain.config(), header, &parent, false, seal, unix_now())
    }

    fn verify_uncles(
        &self,
        chain: &dyn ChainHeaderReader,
        block: &Block,
    ) -> Result<(), ConsensusError> {
        if self.config.pow_mode == PowMode::FullFake {
            return Ok(());
        }
        if block.body.ommers.len() > 2 {
            return Err(ConsensusError::TooManyUncles);
        }
        if block.body.compute_ommers_hash() != block.header.ommers_hash {
            return Err(ConsensusError::InvalidUncleHash);
        }
        if block.body.ommers.is_empty() {
            return Ok(());
        }

        // Gather the past 7 ancestors the uncles may descend from.
        let mut ancestors: HashMap<H256, BlockHeader> = HashMap::new();
        let mut parent_hash = block.header.parent_hash;
        let mut number = block.header.number;
        for _ in 0..7 {
            let Some(n) = number.checked_sub(1) else { break };
            let Some(ancestor) = chain.header(parent_hash, n) else { break };
            parent_hash = ancestor.parent_hash;
            number = n;
            ancestors.insert(ancestor.hash(), ancestor);
        }

        let mut seen: HashSet<H256> = HashSet::new();
        seen.insert(block.hash());
        for uncle in &block.body.ommers {
            let hash = uncle.hash();
            if !seen.insert(hash) {
                return Err(ConsensusError::DuplicateUncle);
            }
            if ancestors.contains_key(&hash) {
                return Err(ConsensusError::UncleIsAncestor);
            }
            let parent = ancestors
                .get(&uncle.parent_hash)
                .ok_or(ConsensusError::DanglingUncle)?;
            self.verify_header_inner(chain.config(), uncle, parent, true, true, unix_now())?;
        }
        Ok(())
    }

    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut BlockHeader,
    ) -> Result<(), ConsensusError> {
        let parent = header
            .number
            .checked_sub(1)
            .and_then(|n| chain.header(header.parent_hash, n))
            .ok_or(ConsensusError::UnknownAncestor)?;
        header.difficulty =
            difficulty::calc_difficulty(chain.config(), header.timestamp, &parent)?;
        Ok(())
    }

    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        state: &mut dyn State,
        uncles: &[BlockHeader],
    ) {
        rewards::accumulate_rewards(chain.config(), state, header, uncles);
    }

    fn calc_difficulty(
        &self,
        chain: &dyn ChainHeaderReader,
        time: u64,
        parent: &BlockHeader,
    ) -> Result<U256, ConsensusError> {
        difficulty::calc_difficulty(chain.config(), time, parent)
    }

    fn seal_hash(&self, header: &BlockHeader) -> H256 {
        header.seal_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyeth_common::config::FeatureConfig;
    use polyeth_common::constants::FRONTIER_BLOCK_REWARD;
    use std::sync::atomic::AtomicBool;

    struct MockChain {
        config: FeatureConfig,
        by_hash: HashMap<H256, BlockHeader>,
        by_number: HashMap<u64, BlockHeader>,
    }

    impl MockChain {
        fn new(config: FeatureConfig) -> MockChain {
            MockChain {
                config,
                by_hash: HashMap::new(),
                by_number: HashMap::new(),
            }
        }

        fn insert(&mut self, header: BlockHeader) {
            self.by_number.insert(header.number, header.clone());
            self.by_hash.insert(header.hash(), header);
        }
    }

    impl ChainHeaderReader for MockChain {
        fn config(&self) -> &dyn ChainConfig {
            &self.config
        }
        fn current_header(&self) -> Option<BlockHeader> {
            self.by_number
                .keys()
                .max()
                .and_then(|n| self.by_number.get(n))
                .cloned()
        }
        fn header(&self, hash: H256, number: u64) -> Option<BlockHeader> {
            self.by_hash
                .get(&hash)
                .filter(|h| h.number == number)
                .cloned()
        }
        fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
            self.by_number.get(&number).cloned()
        }
        fn header_by_hash(&self, hash: H256) -> Option<BlockHeader> {
            self.by_hash.get(&hash).cloned()
        }
    }

    /// A bare proof-of-work chain with no scheduled forks, so headers can
    /// be constructed without fork-specific fields.
    fn plain_config() -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config.ethash = Some(Default::default());
        config
            .block_rewards
            .insert(0, U256::from(FRONTIER_BLOCK_REWARD));
        config
    }

    fn genesis() -> BlockHeader {
        BlockHeader {
            number: 0,
            timestamp: 1_000_000,
            difficulty: U256::from(131_072),
            gas_limit: 1_000_000,
            ..Default::default()
        }
    }

    fn make_child(config: &dyn ChainConfig, parent: &BlockHeader, time: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: parent.hash(),
            ommers_hash: polyeth_common::constants::EMPTY_UNCLE_HASH,
            number: parent.number + 1,
            timestamp: time,
            difficulty: difficulty::calc_difficulty(config, time, parent).expect("fits"),
            gas_limit: parent.gas_limit,
            ..Default::default()
        }
    }

    fn chain_of(len: u64) -> (MockChain, Vec<BlockHeader>) {
        let mut chain = MockChain::new(plain_config());
        let mut headers = Vec::new();
        let mut parent = genesis();
        chain.insert(parent.clone());
        for _ in 0..len {
            let child = make_child(&chain.config, &parent, parent.timestamp + 13);
            chain.insert(child.clone());
            headers.push(child.clone());
            parent = child;
        }
        (chain, headers)
    }

    #[test]
    fn accepts_well_formed_header() {
        let (chain, headers) = chain_of(3);
        let ethash = Ethash::new_tester();
        for header in &headers {
            ethash.verify_header(&chain, header, false).expect("valid header");
        }
    }

    #[test]
    fn rejects_future_block() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let time = unix_now() + 16;
        let header = make_child(&chain.config, &parent, time);
        let ethash = Ethash::new_tester();
        let err = ethash.verify_header(&chain, &header, false);
        assert!(matches!(err, Err(ConsensusError::FutureBlock)));
    }

    #[test]
    fn rejects_non_increasing_timestamp() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        header.timestamp = parent.timestamp;
        let ethash = Ethash::new_tester();
        let err = ethash.verify_header(&chain, &header, false);
        assert!(matches!(err, Err(ConsensusError::OlderBlockTime)));
    }

    #[test]
    fn rejects_wrong_difficulty_and_number() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let ethash = Ethash::new_tester();

        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        header.difficulty += U256::one();
        assert!(matches!(
            ethash.verify_header(&chain, &header, false),
            Err(ConsensusError::InvalidDifficulty { .. })
        ));

        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        header.number += 1;
        // wrong number means the parent lookup fails first
        assert!(matches!(
            ethash.verify_header(&chain, &header, false),
            Err(ConsensusError::UnknownAncestor)
        ));
    }

    #[test]
    fn rejects_oversized_extra_data() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        header.extra_data = vec![0u8; MAXIMUM_EXTRA_DATA_SIZE + 1].into();
        let ethash = Ethash::new_tester();
        assert!(matches!(
            ethash.verify_header(&chain, &header, false),
            Err(ConsensusError::ExtraDataTooLong(33, 32))
        ));
    }

    #[test]
    fn enforces_gas_limit_drift() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        header.gas_limit = parent.gas_limit + parent.gas_limit / 1024 + 1;
        let ethash = Ethash::new_tester();
        assert!(matches!(
            ethash.verify_header(&chain, &header, false),
            Err(ConsensusError::InvalidGasLimit(_))
        ));
    }

    #[test]
    fn seal_verification_roundtrip() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        let ethash = Ethash::new_tester();

        // test-sized cache, difficulty low enough that any nonce passes
        // the target check once the digest matches
        header.difficulty = U256::one();
        header.nonce = 12345;
        let cache = ethash.cache(header.number, None);
        let words = cache.generate(None, 0, false, true);
        let (digest, _) = hashimoto_light(TEST_DATASET_BYTES, words, header.seal_hash(), header.nonce);
        header.mix_digest = digest;

        ethash
            .verify_seal(&chain.config, &header, false)
            .expect("seal verifies");

        header.mix_digest = H256::repeat_byte(0x01);
        assert!(matches!(
            ethash.verify_seal(&chain.config, &header, false),
            Err(ConsensusError::InvalidMixDigest)
        ));

        header.nonce = 54321;
        assert!(matches!(
            ethash.verify_seal(&chain.config, &header, false),
            Err(ConsensusError::InvalidMixDigest)
        ));
    }

    #[test]
    fn impossible_difficulty_fails_target_check() {
        let (chain, _) = chain_of(1);
        let parent = chain.header_by_number(1).expect("exists");
        let mut header = make_child(&chain.config, &parent, parent.timestamp + 13);
        let ethash = Ethash::new_tester();

        header.difficulty = U256::MAX;
        let cache = ethash.cache(header.number, None);
        let words = cache.generate(None, 0, false, true);
        let (digest, _) = hashimoto_light(TEST_DATASET_BYTES, words, header.seal_hash(), header.nonce);
        header.mix_digest = digest;

        assert!(matches!(
            ethash.verify_seal(&chain.config, &header, false),
            Err(ConsensusError::InvalidProofOfWork)
        ));
    }

    #[test]
    fn uncle_rules() {
        let (mut chain, headers) = chain_of(9);
        let config = chain.config.clone();
        let tip = headers.last().expect("nonempty").clone();

        // a legitimate uncle: child of the oldest ancestor still inside
        // the seven-block window
        let uncle_parent = chain.header_by_number(3).expect("exists");
        let uncle = make_child(&config, &uncle_parent, uncle_parent.timestamp + 14);

        let mut body = polyeth_common::types::BlockBody {
            transactions: Vec::new(),
            ommers: vec![uncle.clone()],
        };
        let mut header = make_child(&config, &tip, tip.timestamp + 13);
        header.ommers_hash = body.compute_ommers_hash();
        chain.insert(header.clone());
        let block = Block::new(header.clone(), body.clone());

        let ethash = Ethash::new(EthashConfig {
            pow_mode: PowMode::Fake,
            ..EthashConfig::default()
        });
        ethash.verify_uncles(&chain, &block).expect("valid uncle");

        // an ancestor itself is not an acceptable uncle
        body.ommers = vec![chain.header_by_number(4).expect("exists")];
        let mut header = make_child(&config, &tip, tip.timestamp + 13);
        header.ommers_hash = body.compute_ommers_hash();
        let block = Block::new(header, body.clone());
        assert!(matches!(
            ethash.verify_uncles(&chain, &block),
            Err(ConsensusError::UncleIsAncestor)
        ));

        // an uncle whose parent is deeper than 7 generations dangles
        let deep_parent = chain.header_by_number(2).expect("exists");
        let deep_uncle = make_child(&config, &deep_parent, deep_parent.timestamp + 14);
        body.ommers = vec![deep_uncle];
        let mut header = make_child(&config, &tip, tip.timestamp + 13);
        header.ommers_hash = body.compute_ommers_hash();
        let block = Block::new(header, body.clone());
        assert!(matches!(
            ethash.verify_uncles(&chain, &block),
            Err(ConsensusError::DanglingUncle)
        ));

        // duplicates and count limits
        body.ommers = vec![uncle.clone(), uncle.clone()];
        let mut header = make_child(&config, &tip, tip.timestamp + 13);
        header.ommers_hash = body.compute_ommers_hash();
        let block = Block::new(header, body.clone());
        assert!(matches!(
            ethash.verify_uncles(&chain, &block),
            Err(ConsensusError::DuplicateUncle)
        ));

        body.ommers = vec![uncle.clone(); 3];
        let mut header = make_child(&config, &tip, tip.timestamp + 13);
        header.ommers_hash = body.compute_ommers_hash();
        let block = Block::new(header, body);
        assert!(matches!(
            ethash.verify_uncles(&chain, &block),
            Err(ConsensusError::TooManyUncles)
        ));
    }

    #[test]
    fn batch_results_arrive_in_input_order() {
        let (chain, headers) = chain_of(16);
        let ethash = Ethash::new_tester();
        let seals = vec![false; headers.len()];
        let abort = AtomicBool::new(false);
        let results = ethash.verify_headers(&chain, &headers, &seals, &abort);
        assert_eq!(results.len(), headers.len());
        for result in &results {
            assert!(result.is_ok());
        }

        // a corrupted header fails in place without poisoning its peers
        let mut tampered = headers.clone();
        tampered[5].timestamp = tampered[4].timestamp;
        let results = ethash.verify_headers(&chain, &tampered, &seals, &abort);
        assert!(results[4].is_ok());
        assert!(matches!(results[5], Err(ConsensusError::OlderBlockTime)));
    }

    #[test]
    fn batch_abort_reports_aborted_slots() {
        let (chain, headers) = chain_of(4);
        let ethash = Ethash::new_tester();
        let seals = vec![false; headers.len()];
        let abort = AtomicBool::new(true);
        let results = ethash.verify_headers(&chain, &headers, &seals, &abort);
        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(ConsensusError::Aborted)))
        );
    }

}
