use std::fs;
use std::path::{Path, PathBuf};

use heed::types::{Bytes, SerdeBincode};
use heed::{Database, Env, EnvOpenOptions, MdbError, WithTls};
use log::{debug, info, warn};

use super::{CacheEntry, FeatureCache};
use crate::error::CacheError;
use crate::extractor::Embedding;
use crate::fingerprint::Fingerprint;

/// 基于 LMDB 的持久化特征缓存
///
/// 每个模型使用独立的数据库，键为路径的 blake3 哈希（LMDB 的键长度有限制），
/// 值中保存完整路径和指纹用于校验
pub struct LmdbCache {
    env: Env<WithTls>,
    db: Database<Bytes, SerdeBincode<CacheEntry>>,
    name: String,
    dim: usize,
}

fn cache_key(path: &Path) -> [u8; 32] {
    *blake3::hash(path.as_os_str().as_encoded_bytes()).as_bytes()
}

impl LmdbCache {
    /// 打开或创建缓存
    ///
    /// # Arguments
    ///
    /// * `path` - 缓存目录
    /// * `model_id` - 模型标识，作为数据库名
    /// * `dim` - 特征向量维度，维度不一致的记录视为不存在
    /// * `map_size` - 缓存文件的最大字节数
    pub fn open<P: AsRef<Path>>(
        path: P,
        model_id: &str,
        dim: usize,
        map_size: usize,
    ) -> Result<Self, CacheError> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        debug!("打开特征缓存: {} ({})", path.display(), model_id);

        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(64).open(path)? };
        let mut txn = env.write_txn()?;
        let db = env.create_database(&mut txn, Some(model_id))?;
        txn.commit()?;

        Ok(Self { env, db, name: model_id.to_owned(), dim })
    }

    /// 缓存中的记录数量
    pub fn len(&self) -> Result<u64, CacheError> {
        let txn = self.env.read_txn()?;
        Ok(self.db.len(&txn)?)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// 清空当前模型的全部记录
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut txn = self.env.write_txn()?;
        self.db.clear(&mut txn)?;
        txn.commit()?;
        Ok(())
    }

    fn lookup(&self, path: &Path, fingerprint: &Fingerprint) -> Result<Option<Embedding>, CacheError> {
        let txn = self.env.read_txn()?;
        let entry = match self.db.get(&txn, &cache_key(path)[..]) {
            Ok(entry) => entry,
            Err(heed::Error::Decoding(e)) => return Err(CacheError::Corruption(e.to_string())),
            Err(e) => return Err(e.into()),
        };
        let Some(entry) = entry.filter(|entry| entry.matches(path, fingerprint)) else {
            return Ok(None);
        };
        if entry.vector.len() != self.dim {
            return Ok(None);
        }
        if entry.vector.iter().any(|v| !v.is_finite()) {
            return Err(CacheError::Corruption("特征向量包含非有限值".to_owned()));
        }
        Ok(Some(entry.vector))
    }

    fn write(&self, entry: &CacheEntry) -> heed::Result<()> {
        let mut txn = self.env.write_txn()?;
        self.db.put(&mut txn, &cache_key(&entry.path)[..], entry)?;
        txn.commit()
    }

    fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        match self.write(entry) {
            Err(heed::Error::Mdb(MdbError::MapFull)) => {
                // 缓存写满后整体清空，之后的结果会重新写入
                info!("特征缓存 {} 已满，清空后重试", self.name);
                self.clear()?;
                Ok(self.write(entry)?)
            }
            r => Ok(r?),
        }
    }
}

impl FeatureCache for LmdbCache {
    fn get(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Embedding> {
        match self.lookup(path, fingerprint) {
            Ok(vector) => vector,
            Err(CacheError::Corruption(e)) => {
                warn!("缓存记录损坏，将重新计算: {}: {}", path.display(), e);
                None
            }
            Err(e) => {
                warn!("读取特征缓存失败: {}: {}", path.display(), e);
                None
            }
        }
    }

    fn put(&self, path: &Path, fingerprint: &Fingerprint, vector: &[f32]) {
        let entry = CacheEntry {
            path: PathBuf::from(path),
            fingerprint: fingerprint.clone(),
            vector: vector.to_vec(),
        };
        if let Err(e) = self.store(&entry) {
            warn!("写入特征缓存失败: {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const MAP_SIZE: usize = 16 << 20;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::Blake3([n; 32])
    }

    #[test]
    fn test_get_after_put() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 2, MAP_SIZE).unwrap();
        assert!(cache.is_empty().unwrap());

        cache.put(Path::new("/img/a.jpg"), &fp(1), &[0.5, -0.5]);
        assert_eq!(cache.get(Path::new("/img/a.jpg"), &fp(1)), Some(vec![0.5, -0.5]));
        assert_eq!(cache.get(Path::new("/img/b.jpg"), &fp(1)), None);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_stale_fingerprint() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 2, MAP_SIZE).unwrap();
        cache.put(Path::new("a.jpg"), &fp(1), &[1.0, 0.0]);
        cache.put(Path::new("a.jpg"), &fp(2), &[0.0, 1.0]);

        assert_eq!(cache.get(Path::new("a.jpg"), &fp(1)), None);
        assert_eq!(cache.get(Path::new("a.jpg"), &fp(2)), Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_persist_across_open() {
        let dir = tempdir().unwrap();
        {
            let cache = LmdbCache::open(dir.path(), "model", 3, MAP_SIZE).unwrap();
            cache.put(Path::new("a.jpg"), &fp(7), &[1.0, 2.0, 3.0]);
        }
        let cache = LmdbCache::open(dir.path(), "model", 3, MAP_SIZE).unwrap();
        assert_eq!(cache.get(Path::new("a.jpg"), &fp(7)), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_models_are_isolated() {
        let dir = tempdir().unwrap();
        {
            let cache = LmdbCache::open(dir.path(), "model-a", 2, MAP_SIZE).unwrap();
            cache.put(Path::new("a.jpg"), &fp(1), &[1.0, 0.0]);
        }
        let cache = LmdbCache::open(dir.path(), "model-b", 2, MAP_SIZE).unwrap();
        assert_eq!(cache.get(Path::new("a.jpg"), &fp(1)), None);
    }

    #[test]
    fn test_dimension_mismatch_is_absent() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 2, MAP_SIZE).unwrap();
        cache.put(Path::new("a.jpg"), &fp(1), &[1.0, 0.0, 0.0]);
        assert_eq!(cache.get(Path::new("a.jpg"), &fp(1)), None);
    }

    #[test]
    fn test_corrupted_entry() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 2, MAP_SIZE).unwrap();
        let path = Path::new("a.jpg");

        let raw = cache.db.remap_data_type::<Bytes>();
        let mut txn = cache.env.write_txn().unwrap();
        raw.put(&mut txn, &cache_key(path)[..], b"\x01garbage").unwrap();
        txn.commit().unwrap();

        assert!(matches!(cache.lookup(path, &fp(1)), Err(CacheError::Corruption(_))));
        assert_eq!(cache.get(path, &fp(1)), None);

        // 重新写入后恢复正常
        cache.put(path, &fp(1), &[1.0, 1.0]);
        assert_eq!(cache.get(path, &fp(1)), Some(vec![1.0, 1.0]));
    }

    #[test]
    fn test_key_collision_is_absent() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 2, MAP_SIZE).unwrap();
        let path = Path::new("a.jpg");

        // 键相同但记录属于另一个路径
        let entry = CacheEntry { path: PathBuf::from("b.jpg"), fingerprint: fp(1), vector: vec![1.0, 0.0] };
        let raw = cache.db.remap_data_type::<Bytes>();
        let mut txn = cache.env.write_txn().unwrap();
        raw.put(&mut txn, &cache_key(path)[..], &bincode::serialize(&entry).unwrap()).unwrap();
        txn.commit().unwrap();

        assert_eq!(cache.get(path, &fp(1)), None);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_non_finite_entry_is_corruption() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 2, MAP_SIZE).unwrap();
        let path = Path::new("a.jpg");
        cache.put(path, &fp(1), &[f32::NAN, 1.0]);

        assert!(matches!(cache.lookup(path, &fp(1)), Err(CacheError::Corruption(_))));
        assert_eq!(cache.get(path, &fp(1)), None);

        cache.put(path, &fp(1), &[0.0, 1.0]);
        assert_eq!(cache.get(path, &fp(1)), Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let cache = LmdbCache::open(dir.path(), "model", 1, MAP_SIZE).unwrap();
        for i in 0..10u8 {
            cache.put(Path::new(&format!("{i}.jpg")), &fp(i), &[i as f32]);
        }
        assert_eq!(cache.len().unwrap(), 10);
        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_map_full_clears_and_retries() {
        let dir = tempdir().unwrap();
        let dim = 25_000;
        let cache = LmdbCache::open(dir.path(), "model", dim, 2 << 20).unwrap();
        let vector = vec![0.25f32; dim];
        for i in 0..40u8 {
            cache.put(Path::new(&format!("{i}.jpg")), &fp(i), &vector);
        }
        // 最后写入的记录一定可以读到，较早的记录已被清空
        assert_eq!(cache.get(Path::new("39.jpg"), &fp(39)), Some(vector));
        assert!(cache.get(Path::new("0.jpg"), &fp(0)).is_none());
        assert!(cache.len().unwrap() < 40);
    }
}
