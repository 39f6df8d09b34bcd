use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::builder::RangedU64ValueParser;
use log::info;
use ndarray::Array2;
use ndarray_npy::write_npy;
use tokio::task::spawn_blocking;

use super::{build_engine, build_scanner, cancel_on_ctrl_c};
use crate::cli::SubCommandExtend;
use crate::config::{CacheOptions, EmbedOptions, MAX_WORKERS, Opts, ScanOptions};
use crate::engine::{CancelToken, ImageRecord};
use crate::report::summary;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub cache: CacheOptions,
    /// 图片目录
    pub corpus: PathBuf,
    /// 输出目录，会写入 embeddings.npy 和 paths.json
    pub output: PathBuf,
    /// 计算特征的线程数量，默认为 CPU 核心数
    #[arg(short = 'j', long, value_name = "N", value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_WORKERS))]
    pub workers: Option<usize>,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let token = CancelToken::new();
        let engine = build_engine(opts, &self.embed, &self.cache, self.workers)
            .cancel_token(token.clone());
        let dim = engine.extractor().dim();
        let scanner = build_scanner(&self.corpus, &self.scan)?;

        let watcher = cancel_on_ctrl_c(token);
        let result = spawn_blocking(move || engine.embed_corpus(&scanner)).await?;
        watcher.abort();
        let (records, stats) = result?;

        fs::create_dir_all(&self.output)?;
        let (paths, data) = into_matrix(records, dim)?;
        write_npy(self.output.join("embeddings.npy"), &data)?;
        let writer = BufWriter::new(File::create(self.output.join("paths.json"))?);
        serde_json::to_writer_pretty(writer, &paths)?;

        eprintln!("{}", summary(&stats));
        info!("导出成功: {} 条特征，维度 {}", paths.len(), dim);
        Ok(())
    }
}

/// 把按扫描顺序排列的记录转换为 M x D 矩阵
fn into_matrix(records: Vec<ImageRecord>, dim: usize) -> Result<(Vec<PathBuf>, Array2<f32>)> {
    let mut paths = Vec::with_capacity(records.len());
    let mut data = Vec::with_capacity(records.len() * dim);
    for record in records {
        data.extend(record.embedding.unwrap_or_default());
        paths.push(record.path);
    }
    let matrix = Array2::from_shape_vec((paths.len(), dim), data)?;
    Ok((paths, matrix))
}
