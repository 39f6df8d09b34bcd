use std::io;
use std::path::PathBuf;

use clap::Parser;
use clap::builder::RangedU64ValueParser;
use tokio::task::spawn_blocking;

use super::{build_engine, build_scanner, cancel_on_ctrl_c};
use crate::cli::SubCommandExtend;
use crate::config::{CacheOptions, EmbedOptions, MAX_WORKERS, Opts, PushOptions, ScanOptions};
use crate::engine::CancelToken;
use crate::metrics;
use crate::report::{OutputFormat, print_result};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub cache: CacheOptions,
    #[command(flatten)]
    pub push: PushOptions,
    /// 查询图片的路径
    pub query: PathBuf,
    /// 被搜索的图片目录
    pub corpus: PathBuf,
    /// 显示的结果数量
    #[arg(short = 'n', long, value_name = "COUNT", default_value_t = 10, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub count: usize,
    /// 计算特征的线程数量，默认为 CPU 核心数
    #[arg(short = 'j', long, value_name = "N", value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_WORKERS))]
    pub workers: Option<usize>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let token = CancelToken::new();
        let engine = build_engine(opts, &self.embed, &self.cache, self.workers)
            .cancel_token(token.clone());
        let scanner = build_scanner(&self.corpus, &self.scan)?;

        let watcher = cancel_on_ctrl_c(token);
        let (query, count) = (self.query.clone(), self.count);
        let outcome = spawn_blocking(move || engine.search(&query, &scanner, count)).await?;
        watcher.abort();
        let outcome = outcome?;

        print_result(self.format, &self.query, &outcome, &mut io::stdout(), &mut io::stderr())?;
        metrics::push(&self.push).await
    }
}
