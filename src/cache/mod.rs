mod lmdb;
mod memory;

use std::path::{Path, PathBuf};

pub use lmdb::LmdbCache;
pub use memory::MemoryCache;
use serde::{Deserialize, Serialize};

use crate::extractor::Embedding;
use crate::fingerprint::Fingerprint;

/// 特征向量缓存，键为 (路径, 指纹)
///
/// 缓存只是优化手段：指纹不一致时必须返回 `None`，
/// 缓存内部的任何错误都只记录日志，不向外传播
pub trait FeatureCache: Send + Sync {
    fn get(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Embedding>;

    fn put(&self, path: &Path, fingerprint: &Fingerprint, vector: &[f32]);
}

/// 持久化缓存中保存的一条记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub vector: Embedding,
}

impl CacheEntry {
    /// 记录是否对应给定的 (路径, 指纹)
    pub fn matches(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.path == path && &self.fingerprint == fingerprint
    }
}
