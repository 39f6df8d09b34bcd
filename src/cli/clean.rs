use std::fs;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cache::LmdbCache;
use crate::cli::SubCommandExtend;
use crate::config::{DEFAULT_CACHE_SIZE, EmbedOptions, Opts};
use crate::extractor;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 删除整个缓存目录，包括所有模型的缓存
    #[arg(long)]
    pub all: bool,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let path = opts.conf_dir.feature_cache();
        if self.all {
            if path.exists() {
                info!("删除缓存目录: {}", path.display());
                fs::remove_dir_all(&path)?;
            }
            info!("清理完成");
            return Ok(());
        }

        let extractor = extractor::from_options(&self.embed);
        let model_id = extractor.model_id();
        let cache = LmdbCache::open(&path, &model_id, extractor.dim(), DEFAULT_CACHE_SIZE << 20)?;
        info!("清理 {} 的 {} 条缓存……", model_id, cache.len()?);
        cache.clear()?;
        info!("清理完成");
        Ok(())
    }
}
