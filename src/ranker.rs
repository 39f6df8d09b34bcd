use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SearchError};

/// 一个候选图片与查询图片的相似度
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityScore {
    pub path: PathBuf,
    pub score: f32,
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

fn magnitude(v: &[f32]) -> f64 {
    dot(v, v).sqrt()
}

fn cosine_with_magnitude(q: &[f32], q_mag: f64, v: &[f32]) -> f32 {
    let v_mag = magnitude(v);
    // 零向量与任何向量的相似度都定义为 0
    if q_mag == 0.0 || v_mag == 0.0 {
        return 0.0;
    }
    let score = (dot(q, v) / (q_mag * v_mag)) as f32;
    // 把 -0.0 统一为 0.0，保证排序时两者相等
    if score == 0.0 { 0.0 } else { score }
}

/// 计算余弦相似度，内部使用 f64 累加
///
/// 结果不做截断，数值误差可能让结果略微超出 [-1, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector length mismatch");
    cosine_with_magnitude(a, magnitude(a), b)
}

/// 排名顺序：分数高的在前，分数相同时路径小的在前
fn rank_order(a_score: f32, a_path: &Path, b_score: f32, b_path: &Path) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_path.cmp(b_path))
}

/// 堆中的元素，越“大”表示排名越靠后，堆顶即当前最差的结果
#[derive(Debug)]
struct Ranked(SimilarityScore);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(self.0.score, &self.0.path, other.0.score, &other.0.path)
    }
}

/// 容量为 N 的有界结构，流式地保留目前为止最好的 N 个结果
#[derive(Debug)]
pub struct TopN {
    capacity: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopN {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be at least 1");
        Self { capacity, heap: BinaryHeap::with_capacity(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// 当前保留结果中最差的一个
    pub fn worst(&self) -> Option<&SimilarityScore> {
        self.heap.peek().map(|r| &r.0)
    }

    /// 尝试加入一个候选，返回是否被保留
    ///
    /// 只有被保留时才会复制路径
    pub fn offer(&mut self, path: &Path, score: f32) -> bool {
        if self.heap.len() < self.capacity {
            self.heap.push(Ranked(SimilarityScore { path: path.to_path_buf(), score }));
            return true;
        }
        let Some(mut worst) = self.heap.peek_mut() else {
            return false;
        };
        if rank_order(score, path, worst.0.score, &worst.0.path).is_lt() {
            // PeekMut 在 drop 时会重新调整堆
            *worst = Ranked(SimilarityScore { path: path.to_path_buf(), score });
            true
        } else {
            false
        }
    }

    /// 按分数降序、路径升序输出最终结果
    pub fn into_sorted_vec(self) -> Vec<SimilarityScore> {
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

/// 相似度排序器，持有查询向量并维护前 N 个结果
#[derive(Debug)]
pub struct SimilarityRanker {
    query: Vec<f32>,
    query_mag: f64,
    top: TopN,
    seen: usize,
}

impl SimilarityRanker {
    pub fn new(query: Vec<f32>, n: usize) -> Self {
        let query_mag = magnitude(&query);
        Self { query, query_mag, top: TopN::new(n), seen: 0 }
    }

    /// 本次排序的向量维度 D
    pub fn dim(&self) -> usize {
        self.query.len()
    }

    /// 已经处理过的候选数量
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// 计算候选的相似度并尝试加入结果集
    ///
    /// 维度与查询向量不一致时返回 [`SearchError::DimensionMismatch`]
    pub fn push(&mut self, path: &Path, vector: &[f32]) -> Result<f32> {
        if vector.len() != self.query.len() {
            return Err(SearchError::DimensionMismatch {
                path: path.to_path_buf(),
                expected: self.query.len(),
                found: vector.len(),
            });
        }
        let score = cosine_with_magnitude(&self.query, self.query_mag, vector);
        self.top.offer(path, score);
        self.seen += 1;
        Ok(score)
    }

    pub fn finish(self) -> Vec<SimilarityScore> {
        self.top.into_sorted_vec()
    }
}

/// 对一组 (路径, 向量) 计算与查询向量最相似的 N 个结果
pub fn rank<I, P, V>(query: &[f32], candidates: I, n: usize) -> Result<Vec<SimilarityScore>>
where
    I: IntoIterator<Item = (P, V)>,
    P: AsRef<Path>,
    V: AsRef<[f32]>,
{
    let mut ranker = SimilarityRanker::new(query.to_vec(), n);
    for (path, vector) in candidates {
        ranker.push(path.as_ref(), vector.as_ref())?;
    }
    Ok(ranker.finish())
}
