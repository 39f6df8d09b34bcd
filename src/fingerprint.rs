use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

/// 图片文件指纹，文件内容变化后指纹必须随之变化
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fingerprint {
    /// 文件内容的 blake3 哈希
    Blake3([u8; 32]),
    /// 文件大小和修改时间（纳秒）
    Stat { size: u64, modified_ns: u128 },
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FingerprintKind {
    /// 对文件内容计算 blake3，最可靠
    #[default]
    Blake3,
    /// 只读取文件元数据，速度最快
    Stat,
}

impl FingerprintKind {
    /// 计算文件指纹
    ///
    /// 如果计算过程中读取了文件内容，会一并返回，避免解码时再次读取
    pub fn fingerprint_file(self, path: &Path) -> io::Result<(Fingerprint, Option<Vec<u8>>)> {
        match self {
            Self::Blake3 => {
                let data = fs::read(path)?;
                Ok((Self::fingerprint_bytes(&data), Some(data)))
            }
            Self::Stat => {
                let meta = fs::metadata(path)?;
                stat_or_hash(path, meta.len(), meta.modified())
            }
        }
    }

    pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
        Fingerprint::Blake3(*blake3::hash(data).as_bytes())
    }
}

/// 修改时间不可用时只比较大小并不可靠，退化为对内容计算 blake3
fn stat_or_hash(
    path: &Path,
    size: u64,
    modified: io::Result<SystemTime>,
) -> io::Result<(Fingerprint, Option<Vec<u8>>)> {
    match modified.ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
        Some(d) => Ok((Fingerprint::Stat { size, modified_ns: d.as_nanos() }, None)),
        None => {
            debug!("无法获取修改时间，改为计算内容哈希: {}", path.display());
            FingerprintKind::Blake3.fingerprint_file(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_blake3_returns_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"hello").unwrap();

        let (fp, data) = FingerprintKind::Blake3.fingerprint_file(&path).unwrap();
        assert_eq!(data.as_deref(), Some(&b"hello"[..]));
        assert_eq!(fp, FingerprintKind::fingerprint_bytes(b"hello"));
    }

    #[test]
    fn test_blake3_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"hello").unwrap();
        let (fp1, _) = FingerprintKind::Blake3.fingerprint_file(&path).unwrap();
        fs::write(&path, b"world").unwrap();
        let (fp2, _) = FingerprintKind::Blake3.fingerprint_file(&path).unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn test_stat_does_not_read_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"hello").unwrap();

        let (fp, data) = FingerprintKind::Stat.fingerprint_file(&path).unwrap();
        assert!(data.is_none());
        match fp {
            Fingerprint::Stat { size, .. } => assert_eq!(size, 5),
            _ => panic!("unexpected fingerprint {fp:?}"),
        }
    }

    #[test]
    fn test_stat_changes_with_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"hello").unwrap();
        let (fp1, _) = FingerprintKind::Stat.fingerprint_file(&path).unwrap();
        fs::write(&path, b"hello world").unwrap();
        let (fp2, _) = FingerprintKind::Stat.fingerprint_file(&path).unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn test_stat_without_mtime_hashes_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"hello").unwrap();

        let unsupported = Err(io::Error::new(io::ErrorKind::Unsupported, "no mtime"));
        let (fp, data) = stat_or_hash(&path, 5, unsupported).unwrap();
        assert_eq!(fp, FingerprintKind::fingerprint_bytes(b"hello"));
        assert_eq!(data.as_deref(), Some(&b"hello"[..]));

        // 大小相同但内容不同的文件得到不同的指纹
        fs::write(&path, b"world").unwrap();
        let unsupported = Err(io::Error::new(io::ErrorKind::Unsupported, "no mtime"));
        let (fp2, _) = stat_or_hash(&path, 5, unsupported).unwrap();
        assert_ne!(fp, fp2);

        let (fp3, data) = stat_or_hash(&path, 5, Ok(UNIX_EPOCH + std::time::Duration::from_secs(7))).unwrap();
        assert_eq!(fp3, Fingerprint::Stat { size: 5, modified_ns: 7_000_000_000 });
        assert!(data.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.jpg");
        assert!(FingerprintKind::Blake3.fingerprint_file(&path).is_err());
        assert!(FingerprintKind::Stat.fingerprint_file(&path).is_err());
    }
}
