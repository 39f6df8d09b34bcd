use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::FeatureCache;
use crate::extractor::Embedding;
use crate::fingerprint::Fingerprint;

struct Slot {
    fingerprint: Fingerprint,
    vector: Embedding,
    tick: u64,
}

#[derive(Default)]
struct Lru {
    slots: HashMap<PathBuf, Slot>,
    // tick -> path，最小的 tick 即最久未使用
    order: BTreeMap<u64, PathBuf>,
    tick: u64,
}

impl Lru {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// 进程内的 LRU 缓存，按条目数量限制内存占用
pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<Lru>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be at least 1");
        Self { capacity, inner: Mutex::new(Lru::default()) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("memory cache poisoned").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeatureCache for MemoryCache {
    fn get(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Embedding> {
        let mut lru = self.inner.lock().expect("memory cache poisoned");
        let tick = lru.next_tick();
        let Lru { slots, order, .. } = &mut *lru;
        let slot = slots.get_mut(path)?;
        if &slot.fingerprint != fingerprint {
            return None;
        }
        order.remove(&slot.tick);
        order.insert(tick, path.to_path_buf());
        slot.tick = tick;
        Some(slot.vector.clone())
    }

    fn put(&self, path: &Path, fingerprint: &Fingerprint, vector: &[f32]) {
        let mut lru = self.inner.lock().expect("memory cache poisoned");
        let tick = lru.next_tick();
        let slot = Slot { fingerprint: fingerprint.clone(), vector: vector.to_vec(), tick };
        // 同一路径只保留最新的指纹，旧记录直接被替换
        if let Some(old) = lru.slots.insert(path.to_path_buf(), slot) {
            lru.order.remove(&old.tick);
        }
        lru.order.insert(tick, path.to_path_buf());

        while lru.slots.len() > self.capacity {
            let Some((_, oldest)) = lru.order.pop_first() else {
                break;
            };
            lru.slots.remove(&oldest);
        }
    }
}
