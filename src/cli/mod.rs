mod clean;
mod export;
mod search;

use std::sync::Arc;

use anyhow::Result;
pub use clean::*;
pub use export::*;
use log::{info, warn};
pub use search::*;
use tokio::signal;
use tokio::task::JoinHandle;

use crate::cache::LmdbCache;
use crate::config::{CacheOptions, EmbedOptions, Opts, ScanOptions};
use crate::engine::{CancelToken, Engine};
use crate::extractor;
use crate::scanner::{CorpusScanner, suffix_regex};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 根据命令行参数创建搜索引擎，缓存无法打开时不使用缓存
fn build_engine(
    opts: &Opts,
    embed: &EmbedOptions,
    cache: &CacheOptions,
    workers: Option<usize>,
) -> Engine {
    let extractor = extractor::from_options(embed);
    info!("特征模型: {}，维度 {}", extractor.model_id(), extractor.dim());

    let mut engine = Engine::new(extractor.clone()).fingerprint(cache.fingerprint).progress(true);
    if let Some(workers) = workers {
        engine = engine.workers(workers);
    }
    if !cache.no_cache {
        let path = opts.conf_dir.feature_cache();
        match LmdbCache::open(&path, &extractor.model_id(), extractor.dim(), cache.cache_size << 20)
        {
            Ok(lmdb) => engine = engine.cache(Arc::new(lmdb)),
            Err(e) => warn!("无法打开特征缓存 {}，本次不使用缓存: {}", path.display(), e),
        }
    }
    engine
}

fn build_scanner(corpus: &std::path::Path, scan: &ScanOptions) -> Result<CorpusScanner> {
    let suffix = suffix_regex(&scan.suffix)?;
    Ok(CorpusScanner::new(corpus, suffix).recursive(scan.recursive))
}

/// 收到 Ctrl-C 时取消当前运行
fn cancel_on_ctrl_c(token: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在停止……");
            token.cancel();
        }
    })
}
