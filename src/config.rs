use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::fingerprint::FingerprintKind;
use crate::scanner::DEFAULT_SUFFIX;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "imsim", "imsim")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imsim"));
    ConfDir { path }
});

/// 特征缓存的默认最大体积，单位 MiB
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// 计算特征的最大线程数量
pub const MAX_WORKERS: u64 = 1024;

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".imsim")
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// 颜色布局 + 颜色直方图
    #[default]
    ColorLayout,
    /// 灰度缩略图
    Thumbnail,
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 特征提取模型
    #[arg(short, long, value_enum, default_value_t = ModelKind::ColorLayout)]
    pub model: ModelKind,
    /// color-layout 模型的输入尺寸，图片会被缩放为 SIZE x SIZE
    #[arg(long, value_name = "SIZE", default_value_t = 224, value_parser = clap::value_parser!(u32).range(1..=4096))]
    pub resize: u32,
    /// color-layout 模型的网格数量
    #[arg(long, value_name = "N", default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub grid: u32,
    /// color-layout 模型每个通道的直方图分桶数量
    #[arg(long, value_name = "N", default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..=16))]
    pub bins: u32,
    /// thumbnail 模型的缩略图边长
    #[arg(long, value_name = "SIZE", default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..=256))]
    pub thumbnail_size: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 递归扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheOptions {
    /// 不使用特征缓存
    #[arg(long)]
    pub no_cache: bool,
    /// 判断图片是否变化的方式
    #[arg(long, value_enum, default_value_t = FingerprintKind::Blake3)]
    pub fingerprint: FingerprintKind,
    /// 特征缓存的最大体积，单位 MiB
    #[arg(long, value_name = "MIB", default_value_t = DEFAULT_CACHE_SIZE, value_parser = RangedU64ValueParser::<usize>::new().range(1..=1 << 20))]
    pub cache_size: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct PushOptions {
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imsim", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imsim 配置文件目录
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 在目录中搜索与查询图片最相似的图片
    Search(SearchCommand),
    /// 导出目录中所有图片的特征向量
    Export(ExportCommand),
    /// 清理特征缓存
    Clean(CleanCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回特征缓存目录
    pub fn feature_cache(&self) -> PathBuf {
        self.path.join("features")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
