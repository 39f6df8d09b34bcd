mod color;
mod thumbnail;

use std::path::Path;
use std::sync::Arc;

pub use color::ColorLayoutExtractor;
use image::DynamicImage;
pub use thumbnail::ThumbnailExtractor;

use crate::config::{EmbedOptions, ModelKind};
use crate::error::EmbedError;

/// 一张图片的特征向量，长度固定为 D
pub type Embedding = Vec<f32>;

/// 把一张图片映射为固定长度的特征向量
///
/// 对同一模型版本和同一输入，结果必须是确定的
pub trait EmbeddingExtractor: Send + Sync {
    /// 模型及其参数的唯一标识，用作缓存的命名空间
    fn model_id(&self) -> String;

    /// 特征向量维度
    fn dim(&self) -> usize;

    /// 解码图片并计算特征向量，无法解码时返回 [`EmbedError::Decode`]
    fn embed(&self, bytes: &[u8]) -> Result<Embedding, EmbedError>;

    fn embed_file(&self, path: &Path) -> Result<Embedding, EmbedError> {
        let data = std::fs::read(path)?;
        self.embed(&data)
    }

    /// 是否允许多个线程同时调用 [`EmbeddingExtractor::embed`]
    fn parallel_safe(&self) -> bool {
        true
    }
}

/// 检查特征向量是否完整
pub fn validate(vector: &[f32], dim: usize) -> Result<(), EmbedError> {
    if vector.len() != dim {
        return Err(EmbedError::Malformed(format!(
            "维度为 {}，期望 {}",
            vector.len(),
            dim
        )));
    }
    check_finite(vector)
}

/// 检查特征向量中是否存在 NaN 或无穷大
pub fn check_finite(vector: &[f32]) -> Result<(), EmbedError> {
    match vector.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(EmbedError::Malformed(format!("第 {} 个分量不是有限值", i))),
        None => Ok(()),
    }
}

/// 根据命令行参数创建特征提取器
pub fn from_options(opts: &EmbedOptions) -> Arc<dyn EmbeddingExtractor> {
    match opts.model {
        // 网格数量不能超过缩放后的边长
        ModelKind::ColorLayout => Arc::new(ColorLayoutExtractor::new(
            opts.resize,
            opts.grid.min(opts.resize),
            opts.bins,
        )),
        ModelKind::Thumbnail => Arc::new(ThumbnailExtractor::new(opts.thumbnail_size)),
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<DynamicImage, EmbedError> {
    image::load_from_memory(bytes).map_err(|e| EmbedError::Decode(e.to_string()))
}

/// 原地进行 L2 归一化，零向量保持不变
pub(crate) fn normalize_l2(values: &mut [f32]) {
    let norm = values.iter().map(|&v| v as f64 * v as f64).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in values {
            *v = (*v as f64 / norm) as f32;
        }
    }
}
