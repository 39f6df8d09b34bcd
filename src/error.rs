use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 图片目录无法扫描，属于致命错误
#[derive(Error, Debug)]
#[error("无法扫描图片目录 {}: {source}", .path.display())]
pub struct ScanError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// 单张图片无法生成特征向量
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("读取图片失败: {0}")]
    Read(#[from] io::Error),
    #[error("图片解码失败: {0}")]
    Decode(String),
    #[error("特征向量无效: {0}")]
    Malformed(String),
}

/// 特征缓存的内部错误，只会被记录，不会中断搜索
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("缓存数据库错误: {0}")]
    Lmdb(#[from] heed::Error),
    #[error("缓存记录损坏: {0}")]
    Corruption(String),
    #[error("缓存目录错误: {0}")]
    Io(#[from] io::Error),
}

/// 会中断整次搜索的错误
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("无法处理查询图片 {}: {source}", .path.display())]
    Query {
        path: PathBuf,
        #[source]
        source: EmbedError,
    },
    #[error("特征向量维度不一致: {} 的维度为 {found}，期望 {expected}", .path.display())]
    DimensionMismatch { path: PathBuf, expected: usize, found: usize },
    #[error("搜索已取消")]
    Cancelled,
}

impl SearchError {
    /// 命令行退出码，用于区分不同的失败原因
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Scan(_) => 2,
            Self::Query { .. } => 3,
            Self::DimensionMismatch { .. } => 4,
            Self::Cancelled => 130,
        }
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
