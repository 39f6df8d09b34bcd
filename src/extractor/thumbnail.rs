use image::imageops::FilterType;

use super::{Embedding, EmbeddingExtractor, decode, normalize_l2, validate};
use crate::error::EmbedError;

/// 灰度缩略图特征：缩放到 side x side，减去均值后归一化
///
/// 纯色图片会得到零向量
#[derive(Debug, Clone)]
pub struct ThumbnailExtractor {
    side: u32,
}

impl ThumbnailExtractor {
    pub fn new(side: u32) -> Self {
        assert!(side > 0, "side must be positive");
        Self { side }
    }
}

impl Default for ThumbnailExtractor {
    fn default() -> Self {
        Self::new(16)
    }
}

impl EmbeddingExtractor for ThumbnailExtractor {
    fn model_id(&self) -> String {
        format!("thumbnail-v1-s{}", self.side)
    }

    fn dim(&self) -> usize {
        (self.side * self.side) as usize
    }

    fn embed(&self, bytes: &[u8]) -> Result<Embedding, EmbedError> {
        let image = decode(bytes)?;
        let gray = image.resize_exact(self.side, self.side, FilterType::Triangle).to_luma8();

        let mut out = gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect::<Vec<_>>();
        let mean = out.iter().map(|&v| v as f64).sum::<f64>() / out.len() as f64;
        out.iter_mut().for_each(|v| *v = (*v as f64 - mean) as f32);

        normalize_l2(&mut out);
        validate(&out, self.dim())?;
        Ok(out)
    }
}
