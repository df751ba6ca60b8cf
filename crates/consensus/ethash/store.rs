//! On-disk persistence and in-memory caching for Ethash caches and
//! datasets. Files hold native-endian `u32` words behind a two-word magic
//! header; mappings are released when the owning item drops.

use std::fs::{self, File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use ethereum_types::H256;
use lru::LruCache;
use memmap2::{Mmap, MmapMut};
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};

use crate::error::StoreError;

use super::algorithm::{
    EPOCH_LENGTH_DEFAULT, EPOCH_LENGTH_ECIP1099, MAX_EPOCH, cache_size, dataset_size,
    generate_cache, generate_dataset, seed_hash,
};

/// Data structure version used for file naming.
pub const ALGORITHM_REVISION: u32 = 23;

/// Sanity-check header of a cache or dataset dump.
pub const DUMP_MAGIC: [u32; 2] = [0xbadd_cafe, 0xfee1_dead];

/// Cache and dataset sizes used when `PowMode::Test` is active: large
/// enough to exercise the algorithm, small enough for unit tests.
pub const TEST_CACHE_BYTES: u64 = 1024;
pub const TEST_DATASET_BYTES: u64 = 32 * 1024;

fn endian_suffix() -> &'static str {
    if cfg!(target_endian = "little") { "" } else { ".be" }
}

pub fn cache_file_name(seed: H256) -> String {
    format!(
        "cache-R{ALGORITHM_REVISION}-{}{}",
        hex::encode(&seed.as_bytes()[..8]),
        endian_suffix()
    )
}

pub fn dataset_file_name(seed: H256) -> String {
    format!(
        "full-R{ALGORITHM_REVISION}-{}{}",
        hex::encode(&seed.as_bytes()[..8]),
        endian_suffix()
    )
}

fn bytes_as_words(bytes: &[u8]) -> &[u32] {
    debug_assert_eq!(bytes.as_ptr() as usize % 4, 0);
    debug_assert_eq!(bytes.len() % 4, 0);
    // mappings are page aligned and the magic header keeps the payload on
    // a word boundary
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<u32>(), bytes.len() / 4) }
}

/// Cache or dataset words, either owned or memory mapped. Dropping the
/// mapped variant unmaps the region and closes the file.
#[derive(Debug)]
pub enum EthashData {
    Memory(Vec<u32>),
    Mapped { _file: File, mmap: Mmap },
}

impl EthashData {
    pub fn words(&self) -> &[u32] {
        match self {
            EthashData::Memory(words) => words,
            EthashData::Mapped { mmap, .. } => bytes_as_words(&mmap[DUMP_MAGIC.len() * 4..]),
        }
    }
}

fn check_magic(bytes: &[u8]) -> Result<(), StoreError> {
    if bytes.len() < DUMP_MAGIC.len() * 4 {
        return Err(StoreError::TruncatedDump);
    }
    let header = bytes_as_words(&bytes[..DUMP_MAGIC.len() * 4]);
    if header != DUMP_MAGIC {
        return Err(StoreError::InvalidDumpMagic);
    }
    Ok(())
}

/// Maps an existing dump read-only, verifying the magic header.
pub fn memory_map(path: &Path, lock: bool) -> Result<EthashData, StoreError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    check_magic(&mmap)?;
    #[cfg(unix)]
    if lock {
        if let Err(err) = mmap.lock() {
            warn!(path = %path.display(), %err, "failed to lock ethash dump in memory");
        }
    }
    #[cfg(not(unix))]
    let _ = lock;
    Ok(EthashData::Mapped { _file: file, mmap })
}

/// Generates a dump straight into a memory-mapped temporary file, then
/// atomically moves it into place and re-maps it read-only.
pub fn memory_map_and_generate(
    path: &Path,
    size: u64,
    lock: bool,
    generator: impl FnOnce(&mut [u32]),
) -> Result<EthashData, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("tmp");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)?;
    file.set_len(DUMP_MAGIC.len() as u64 * 4 + size)?;

    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    for (i, magic) in DUMP_MAGIC.iter().enumerate() {
        mmap[i * 4..(i + 1) * 4].copy_from_slice(&magic.to_ne_bytes());
    }
    {
        let payload = &mut mmap[DUMP_MAGIC.len() * 4..];
        debug_assert_eq!(payload.as_ptr() as usize % 4, 0);
        let words = unsafe {
            std::slice::from_raw_parts_mut(payload.as_mut_ptr().cast::<u32>(), payload.len() / 4)
        };
        generator(words);
    }
    mmap.flush()?;
    drop(mmap);
    drop(file);

    fs::rename(&temp, path)?;
    memory_map(path, lock)
}

fn words_keccak256(words: &[u32]) -> String {
    let mut hasher = Keccak256::new();
    for word in words {
        hasher.update(word.to_le_bytes());
    }
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Known-bad dumps written by clients that kept the 30000-block epoch
/// length past the ECIP-1099 transition. Filenames match the good data,
/// so contents are checked by hash.
pub fn is_bad_cache(epoch: u64, epoch_length: u64, data: &[u32]) -> Option<String> {
    if epoch_length != EPOCH_LENGTH_ECIP1099 {
        return None;
    }
    let (bad_cache, bad_dataset) = match epoch {
        // mordor
        42 => (
            "0xafa2a00911843b0a67314614e629d9e550ef74da4dca2215c475a0f93333aedc",
            "0xc07d08a9f8a2b5af0e87f68c8df9eaf28d7cef2ae3fe86d8c306d9139861c15f",
        ),
        // classic mainnet
        195 => (
            "0x5794130ea9e433185214fb4032edbd3473499267e197d9003a6a1a5bd300b3e5",
            "0xe9cc9df33ee6de075558fb07fd67d59068a9751c36c6e9ae38163f6da90a2240",
        ),
        196 => (
            "0x4a37ee8c8cb4f75c05e23369cadeec7a6ed7386226a629794a733e0249d92d5f",
            "0xf281b059ce535a7c146c00ada26114406bc08a9657bf9147542f92f9f9f08bf2",
        ),
        _ => return None,
    };
    let hash = words_keccak256(data);
    (hash == bad_cache || hash == bad_dataset).then_some(hash)
}

fn remove_stale_dumps(dir: &Path, epoch: u64, epoch_length: u64, limit: u64, name: fn(H256) -> String) {
    if let Some(stale) = epoch.checked_sub(limit) {
        for ep in 0..=stale {
            let path = dir.join(name(seed_hash(ep, epoch_length)));
            let _ = fs::remove_file(path);
        }
    }
}

/// A verification cache for one epoch, generated at most once.
pub struct Cache {
    pub epoch: u64,
    pub epoch_length: u64,
    data: OnceLock<Arc<EthashData>>,
}

impl Cache {
    fn new(epoch: u64, epoch_length: u64) -> Cache {
        Cache {
            epoch,
            epoch_length,
            data: OnceLock::new(),
        }
    }

    /// Returns the cache words, generating or loading them first if
    /// needed. Concurrent callers share a single build.
    pub fn generate(
        &self,
        dir: Option<&Path>,
        on_disk_limit: u64,
        lock_mmap: bool,
        test: bool,
    ) -> &[u32] {
        self.data
            .get_or_init(|| {
                let size = if test { TEST_CACHE_BYTES } else { cache_size(self.epoch) };
                let seed = seed_hash(self.epoch, self.epoch_length);

                let Some(dir) = dir else {
                    let mut words = vec![0u32; size as usize / 4];
                    generate_cache(&mut words, self.epoch, seed);
                    return Arc::new(EthashData::Memory(words));
                };

                let path = dir.join(cache_file_name(seed));
                match memory_map(&path, lock_mmap) {
                    Ok(data) => {
                        match is_bad_cache(self.epoch, self.epoch_length, data.words()) {
                            None => {
                                debug!(epoch = self.epoch, "loaded ethash cache from disk");
                                return Arc::new(data);
                            }
                            Some(hash) => {
                                warn!(epoch = self.epoch, hash, "cache flagged as bad, regenerating");
                                drop(data);
                                let _ = fs::remove_file(&path);
                            }
                        }
                    }
                    Err(err) => debug!(epoch = self.epoch, %err, "no usable ethash cache on disk"),
                }

                let built = memory_map_and_generate(&path, size, lock_mmap, |words| {
                    generate_cache(words, self.epoch, seed)
                });
                let data = match built {
                    Ok(data) => data,
                    Err(err) => {
                        warn!(epoch = self.epoch, %err, "failed to write ethash cache, keeping it in memory");
                        let mut words = vec![0u32; size as usize / 4];
                        generate_cache(&mut words, self.epoch, seed);
                        EthashData::Memory(words)
                    }
                };
                remove_stale_dumps(dir, self.epoch, self.epoch_length, on_disk_limit, cache_file_name);
                Arc::new(data)
            })
            .words()
    }
}

/// A mining dataset for one epoch. The `generated` flag lets sealers fall
/// back to light verification while a build is still running elsewhere.
pub struct Dataset {
    pub epoch: u64,
    pub epoch_length: u64,
    data: OnceLock<Arc<EthashData>>,
    done: AtomicBool,
}

impl Dataset {
    fn new(epoch: u64, epoch_length: u64) -> Dataset {
        Dataset {
            epoch,
            epoch_length,
            data: OnceLock::new(),
            done: AtomicBool::new(false),
        }
    }

    pub fn generated(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn generate(
        &self,
        dir: Option<&Path>,
        on_disk_limit: u64,
        lock_mmap: bool,
        test: bool,
    ) -> &[u32] {
        let words = self
            .data
            .get_or_init(|| {
                let (csize, dsize) = if test {
                    (TEST_CACHE_BYTES, TEST_DATASET_BYTES)
                } else {
                    (cache_size(self.epoch), dataset_size(self.epoch))
                };
                let seed = seed_hash(self.epoch, self.epoch_length);

                let mut cache = vec![0u32; csize as usize / 4];
                generate_cache(&mut cache, self.epoch, seed);

                let Some(dir) = dir else {
                    let mut words = vec![0u32; dsize as usize / 4];
                    generate_dataset(&mut words, self.epoch, &cache);
                    return Arc::new(EthashData::Memory(words));
                };

                let path = dir.join(dataset_file_name(seed));
                match memory_map(&path, lock_mmap) {
                    Ok(data) => {
                        match is_bad_cache(self.epoch, self.epoch_length, data.words()) {
                            None => {
                                debug!(epoch = self.epoch, "loaded ethash dataset from disk");
                                return Arc::new(data);
                            }
                            Some(hash) => {
                                warn!(epoch = self.epoch, hash, "dataset flagged as bad, regenerating");
                                drop(data);
                                let _ = fs::remove_file(&path);
                            }
                        }
                    }
                    Err(err) => debug!(epoch = self.epoch, %err, "no usable ethash dataset on disk"),
                }

                let built = memory_map_and_generate(&path, dsize, lock_mmap, |words| {
                    generate_dataset(words, self.epoch, &cache)
                });
                let data = match built {
                    Ok(data) => data,
                    Err(err) => {
                        warn!(epoch = self.epoch, %err, "failed to write ethash dataset, keeping it in memory");
                        let mut words = vec![0u32; dsize as usize / 4];
                        generate_dataset(&mut words, self.epoch, &cache);
                        EthashData::Memory(words)
                    }
                };
                remove_stale_dumps(dir, self.epoch, self.epoch_length, on_disk_limit, dataset_file_name);
                Arc::new(data)
            })
            .words();
        self.done.store(true, Ordering::Release);
        words
    }
}

/// Epoch-keyed LRU with a single pre-warmed "future" slot for the next
/// epoch, so verification never stalls on generation at epoch boundaries.
pub struct EpochLru<T> {
    what: &'static str,
    new_item: fn(u64, u64) -> T,
    inner: Mutex<EpochLruState<T>>,
}

struct EpochLruState<T> {
    items: LruCache<u64, Arc<T>>,
    future: u64,
    future_item: Option<Arc<T>>,
}

impl<T> EpochLru<T> {
    pub fn new(what: &'static str, max_items: usize, new_item: fn(u64, u64) -> T) -> EpochLru<T> {
        let capacity = NonZeroUsize::new(max_items).unwrap_or(NonZeroUsize::MIN);
        EpochLru {
            what,
            new_item,
            inner: Mutex::new(EpochLruState {
                items: LruCache::new(capacity),
                future: 0,
                future_item: None,
            }),
        }
    }

    /// Returns the item for `epoch`, promoting the future slot when it
    /// matches, and the freshly installed next-epoch item when this call
    /// advanced the future slot.
    pub fn get(
        &self,
        epoch: u64,
        epoch_length: u64,
        ecip1099_block: Option<u64>,
    ) -> (Arc<T>, Option<Arc<T>>) {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let cached = state.items.get(&epoch).cloned();
        let item = match cached {
            Some(item) => item,
            None => {
                let item = if state.future > 0 && state.future == epoch {
                    state.future_item.take().unwrap_or_else(|| {
                        Arc::new((self.new_item)(epoch, epoch_length))
                    })
                } else {
                    debug!(what = self.what, epoch, "requiring new ethash item");
                    Arc::new((self.new_item)(epoch, epoch_length))
                };
                state.items.put(epoch, item.clone());
                item
            }
        };

        // Pre-generation must account for the halved epoch numbering that
        // starts at the ECIP-1099 block.
        let mut next_epoch = epoch + 1;
        let mut next_length = epoch_length;
        if let Some(activation) = ecip1099_block {
            if next_epoch * epoch_length == activation && epoch_length == EPOCH_LENGTH_DEFAULT {
                next_epoch /= 2;
                next_length = EPOCH_LENGTH_ECIP1099;
            }
        }

        let mut future = None;
        if epoch < MAX_EPOCH - 1 && state.future < next_epoch {
            debug!(what = self.what, epoch = next_epoch, "requiring new future ethash item");
            let item = Arc::new((self.new_item)(next_epoch, next_length));
            state.future = next_epoch;
            state.future_item = Some(item.clone());
            future = Some(item);
        }
        (item, future)
    }
}

pub(super) fn new_cache(epoch: u64, epoch_length: u64) -> Cache {
    Cache::new(epoch, epoch_length)
}

pub(super) fn new_dataset(epoch: u64, epoch_length: u64) -> Dataset {
    Dataset::new(epoch, epoch_length)
}

/// Directory a dump lives in plus its limits; shared by caches and
/// datasets through [`super::EthashConfig`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub dir: Option<PathBuf>,
    pub in_mem: usize,
    pub on_disk: u64,
    pub lock_mmap: bool,
}

impl Default for StoreConfig {
    fn default() -> StoreConfig {
        StoreConfig {
            dir: None,
            in_mem: 2,
            on_disk: 3,
            lock_mmap: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_embed_revision_and_seed() {
        let seed = seed_hash(3, EPOCH_LENGTH_DEFAULT);
        let name = cache_file_name(seed);
        assert!(name.starts_with("cache-R23-356e5a2cc1eba076"));
        assert!(dataset_file_name(seed).starts_with("full-R23-356e5a2cc1eba076"));
    }

    #[test]
    fn dump_roundtrip_preserves_words() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dump");
        let original: Vec<u32> = (0..512u32).map(|i| i.wrapping_mul(0x9e3779b9)).collect();

        let mapped = memory_map_and_generate(&path, 512 * 4, false, |words| {
            words.copy_from_slice(&original);
        })
        .expect("generate");
        assert_eq!(mapped.words(), &original[..]);
        drop(mapped);

        let reloaded = memory_map(&path, false).expect("reload");
        assert_eq!(reloaded.words(), &original[..]);
    }

    #[test]
    fn bad_magic_is_rejected_and_regenerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dump");

        let mut bytes = Vec::new();
        for magic in [0xdead_beefu32, 0xdead_beef] {
            bytes.extend_from_slice(&magic.to_ne_bytes());
        }
        bytes.extend_from_slice(&[0u8; 64]);
        fs::write(&path, &bytes).expect("write");

        let err = memory_map(&path, false).expect_err("magic mismatch");
        assert!(matches!(err, StoreError::InvalidDumpMagic));

        // regeneration into the same path succeeds
        let mapped =
            memory_map_and_generate(&path, 64, false, |words| words.fill(7)).expect("generate");
        assert_eq!(mapped.words(), &[7u32; 16][..]);
    }

    #[test]
    fn truncated_dump_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dump");
        fs::write(&path, [0xfe, 0xca]).expect("write");
        let err = memory_map(&path, false).expect_err("too short");
        assert!(matches!(err, StoreError::TruncatedDump));
    }

    #[test]
    fn deny_list_only_applies_to_ecip1099_epochs() {
        let data = vec![1u32, 2, 3];
        assert_eq!(is_bad_cache(42, EPOCH_LENGTH_DEFAULT, &data), None);
        assert_eq!(is_bad_cache(42, EPOCH_LENGTH_ECIP1099, &data), None);
        assert_eq!(is_bad_cache(7, EPOCH_LENGTH_ECIP1099, &data), None);
    }

    #[test]
    fn lru_promotes_future_slot() {
        let lru: EpochLru<Cache> = EpochLru::new("cache", 2, new_cache);

        let (item, future) = lru.get(5, EPOCH_LENGTH_DEFAULT, None);
        assert_eq!(item.epoch, 5);
        let future = future.expect("future slot installed");
        assert_eq!(future.epoch, 6);

        // requesting the future epoch promotes the pre-built item
        let (promoted, next_future) = lru.get(6, EPOCH_LENGTH_DEFAULT, None);
        assert!(Arc::ptr_eq(&promoted, &future));
        assert_eq!(next_future.expect("advances").epoch, 7);
    }

    #[test]
    fn lru_future_slot_halves_epoch_at_ecip1099() {
        let lru: EpochLru<Cache> = EpochLru::new("cache", 2, new_cache);
        // epoch 389 of 30000-block epochs ends at the 11.7M activation
        let (_, future) = lru.get(389, EPOCH_LENGTH_DEFAULT, Some(11_700_000));
        let future = future.expect("future slot installed");
        assert_eq!(future.epoch, 195);
        assert_eq!(future.epoch_length, EPOCH_LENGTH_ECIP1099);
    }

    #[test]
    fn cache_generation_collapses_to_single_build() {
        let cache = Cache::new(0, EPOCH_LENGTH_DEFAULT);
        let a = cache.generate(None, 0, false, true).to_vec();
        let b = cache.generate(None, 0, false, true);
        assert_eq!(a, b);
    }
}
