use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;
use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::cache::FeatureCache;
use crate::error::{EmbedError, Result, SearchError};
use crate::extractor::{Embedding, EmbeddingExtractor, check_finite, validate};
use crate::fingerprint::{Fingerprint, FingerprintKind};
use crate::metrics::{self, ImageStatus};
use crate::ranker::{SimilarityRanker, SimilarityScore};
use crate::scanner::CorpusScanner;
use crate::utils::pb_style;

/// 跨线程共享的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Embedded,
    Failed(String),
}

/// 一次运行中的一张候选图片
#[derive(Debug, Clone)]
pub struct ImageRecord {
    /// 在扫描结果中的位置
    pub seq: usize,
    pub path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
    pub embedding: Option<Embedding>,
    pub status: RecordStatus,
    /// 特征向量是否来自缓存
    pub cached: bool,
}

impl ImageRecord {
    pub fn new(seq: usize, path: PathBuf) -> Self {
        Self { seq, path, fingerprint: None, embedding: None, status: RecordStatus::Pending, cached: false }
    }
}

/// 一次运行的统计信息
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// 扫描到并处理完成的图片数量
    pub scanned: usize,
    /// 成功得到特征向量的数量，包括缓存命中
    pub embedded: usize,
    /// 缓存命中数量
    pub cached: usize,
    /// 失败的图片及原因
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub ranking: Vec<SimilarityScore>,
    pub stats: RunStats,
}

/// 搜索引擎
///
/// 扫描线程按顺序分发路径，多个工作线程并行计算特征，
/// 调用线程作为唯一的汇总者依次处理结果
pub struct Engine {
    extractor: Arc<dyn EmbeddingExtractor>,
    cache: Option<Arc<dyn FeatureCache>>,
    fingerprint: FingerprintKind,
    workers: usize,
    progress: bool,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        Self {
            extractor,
            cache: None,
            fingerprint: FingerprintKind::default(),
            workers: num_cpus::get(),
            progress: false,
            cancel: CancelToken::default(),
        }
    }

    pub fn cache(mut self, cache: Arc<dyn FeatureCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fingerprint(mut self, kind: FingerprintKind) -> Self {
        self.fingerprint = kind;
        self
    }

    /// 工作线程数量，至少为 1
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn extractor(&self) -> &dyn EmbeddingExtractor {
        self.extractor.as_ref()
    }

    /// 计算查询图片的特征向量，查询图片不会写入缓存
    pub fn embed_query(&self, path: &Path) -> Result<Embedding> {
        let query_err = |source| SearchError::Query { path: path.to_path_buf(), source };
        let vector = self.extractor.embed_file(path).map_err(query_err)?;
        check_finite(&vector).map_err(query_err)?;
        debug!("查询图片特征维度: {}", vector.len());
        Ok(vector)
    }

    /// 在目录中搜索与查询图片最相似的 n 张图片
    pub fn search(&self, query: &Path, scanner: &CorpusScanner, n: usize) -> Result<SearchOutcome> {
        let query = self.embed_query(query)?;
        self.search_vector(query, scanner, n)
    }

    /// 在目录中搜索与给定向量最相似的 n 张图片
    pub fn search_vector(
        &self,
        query: Embedding,
        scanner: &CorpusScanner,
        n: usize,
    ) -> Result<SearchOutcome> {
        let start = Instant::now();
        let mut ranker = SimilarityRanker::new(query, n);
        let stats = self.process(scanner, |record| {
            if let Some(vector) = &record.embedding {
                ranker.push(&record.path, vector)?;
            }
            Ok(())
        })?;
        let ranking = ranker.finish();

        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_search_duration(elapsed);
        if let Some(best) = ranking.first() {
            metrics::observe_search_max_score(best.score);
        }
        debug!("搜索耗时: {:.2}s", elapsed);
        Ok(SearchOutcome { ranking, stats })
    }

    /// 计算目录中所有图片的特征向量，结果按扫描顺序排列
    ///
    /// 所有向量的维度必须与特征提取器声明的一致
    pub fn embed_corpus(&self, scanner: &CorpusScanner) -> Result<(Vec<ImageRecord>, RunStats)> {
        let dim = self.extractor.dim();
        let mut records = vec![];
        let stats = self.process(scanner, |record| {
            let found = record.embedding.as_ref().map_or(0, Vec::len);
            if found != dim {
                return Err(SearchError::DimensionMismatch { path: record.path, expected: dim, found });
            }
            records.push(record);
            Ok(())
        })?;
        records.sort_unstable_by_key(|record| record.seq);
        Ok((records, stats))
    }

    /// 扫描目录并计算特征向量，每个成功的记录都会依次交给 `sink`
    ///
    /// `sink` 只在调用线程上执行，返回错误时停止分发并丢弃剩余结果
    pub fn process<F>(&self, scanner: &CorpusScanner, mut sink: F) -> Result<RunStats>
    where
        F: FnMut(ImageRecord) -> Result<()>,
    {
        let paths = scanner.scan()?;
        let workers = if self.extractor.parallel_safe() { self.workers } else { 1 };
        info!("使用 {} 个线程计算特征", workers);

        let pb = if self.progress {
            ProgressBar::no_length().with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };

        let cancel = &self.cancel;
        let stop = AtomicBool::new(false);
        let halted = || stop.load(Ordering::Relaxed) || cancel.is_cancelled();
        let mut stats = RunStats::default();

        let result = thread::scope(|s| {
            let (path_tx, path_rx) = bounded(workers.saturating_mul(4));
            let (record_tx, record_rx) = bounded(workers.saturating_mul(4));

            s.spawn(move || {
                for (seq, path) in paths.enumerate() {
                    if halted() || path_tx.send((seq, path)).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..workers {
                let path_rx = path_rx.clone();
                let record_tx = record_tx.clone();
                s.spawn(move || {
                    while let Ok((seq, path)) = path_rx.recv() {
                        // 停止后队列中剩余的路径直接跳过
                        if halted() {
                            continue;
                        }
                        if record_tx.send(self.embed_record(seq, path)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(path_rx);
            drop(record_tx);

            let mut result = Ok(());
            for record in record_rx {
                if halted() {
                    continue;
                }
                pb.inc(1);
                stats.scanned += 1;
                match record.status {
                    RecordStatus::Embedded => {
                        stats.embedded += 1;
                        if record.cached {
                            stats.cached += 1;
                        }
                        if let Err(e) = sink(record) {
                            stop.store(true, Ordering::Relaxed);
                            result = Err(e);
                        }
                    }
                    RecordStatus::Failed(ref reason) => {
                        warn!("跳过图片 {}: {}", record.path.display(), reason);
                        stats.failed.push((record.path.clone(), reason.clone()));
                    }
                    RecordStatus::Pending => unreachable!("worker returned a pending record"),
                }
            }
            result
        });
        pb.finish_and_clear();

        result?;
        if cancel.is_cancelled() {
            info!("搜索已取消，已处理 {} 张图片", stats.scanned);
            return Err(SearchError::Cancelled);
        }
        info!(
            "扫描完成: 共 {} 张图片，{} 张来自缓存，{} 张失败",
            stats.scanned,
            stats.cached,
            stats.failed.len()
        );
        Ok(stats)
    }

    fn embed_record(&self, seq: usize, path: PathBuf) -> ImageRecord {
        let mut record = ImageRecord::new(seq, path);
        match self.load_embedding(&record.path) {
            Ok((fingerprint, vector, cached)) => {
                metrics::inc_image_count(if cached { ImageStatus::Cached } else { ImageStatus::Embedded });
                record.fingerprint = Some(fingerprint);
                record.embedding = Some(vector);
                record.status = RecordStatus::Embedded;
                record.cached = cached;
            }
            Err(e) => {
                metrics::inc_image_count(ImageStatus::Failed);
                record.status = RecordStatus::Failed(e.to_string());
            }
        }
        record
    }

    fn load_embedding(&self, path: &Path) -> Result<(Fingerprint, Embedding, bool), EmbedError> {
        let (fingerprint, data) = self.fingerprint.fingerprint_file(path)?;
        if let Some(vector) = self.cache.as_ref().and_then(|cache| cache.get(path, &fingerprint)) {
            // 缓存中的向量不合法时视为不存在，重新计算后覆盖
            match validate(&vector, self.extractor.dim()) {
                Ok(()) => return Ok((fingerprint, vector, true)),
                Err(e) => warn!("缓存记录无效，将重新计算: {}: {}", path.display(), e),
            }
        }

        let start = Instant::now();
        let vector = match data {
            Some(data) => self.extractor.embed(&data)?,
            None => self.extractor.embed_file(path)?,
        };
        check_finite(&vector)?;
        metrics::observe_embed_duration(start.elapsed().as_secs_f32());

        if let Some(cache) = &self.cache {
            cache.put(path, &fingerprint, &vector);
        }
        Ok((fingerprint, vector, false))
    }
}
