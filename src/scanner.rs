use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::error::ScanError;

/// 默认识别的图片后缀
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png";

/// 扫描目录中的候选图片
///
/// 每次调用 [`CorpusScanner::scan`] 都会重新遍历目录，结果按路径字典序排列
#[derive(Debug, Clone)]
pub struct CorpusScanner {
    root: PathBuf,
    suffix: Regex,
    recursive: bool,
}

/// 由逗号分隔的后缀列表构建一个不区分大小写的正则
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let parts = suffix
        .split(',')
        .map(|s| s.trim().trim_start_matches('.'))
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>();
    Regex::new(&format!("(?i)^({})$", parts.join("|")))
}

impl CorpusScanner {
    pub fn new<P: Into<PathBuf>>(root: P, suffix: Regex) -> Self {
        Self { root: root.into(), suffix, recursive: false }
    }

    /// 使用默认后缀 jpg, jpeg, png
    pub fn with_default_suffix<P: Into<PathBuf>>(root: P) -> Self {
        let suffix = suffix_regex(DEFAULT_SUFFIX).expect("default suffix is a valid regex");
        Self::new(root, suffix)
    }

    /// 是否扫描子目录
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| self.suffix.is_match(&ext.to_string_lossy()))
    }

    /// 开始一次扫描，返回惰性的路径序列
    ///
    /// 目录不存在或无法读取时返回 [`ScanError`]；
    /// 单个文件的问题不会在这里报错，而是在之后读取时体现
    pub fn scan(&self) -> Result<impl Iterator<Item = PathBuf> + '_, ScanError> {
        let err = |source| ScanError { path: self.root.clone(), source };
        let meta = fs::metadata(&self.root).map_err(err)?;
        if !meta.is_dir() {
            return Err(err(io::Error::new(io::ErrorKind::NotADirectory, "不是目录")));
        }
        // 提前确认目录可读，walkdir 只会在迭代时报告根目录的错误
        fs::read_dir(&self.root).map_err(err)?;

        info!("开始扫描目录: {}", self.root.display());
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let entries = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("跳过无法访问的路径: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.accepts(entry.path()))
            .map(|entry| entry.into_path());
        Ok(entries)
    }
}
