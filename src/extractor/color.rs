use image::imageops::FilterType;

use super::{Embedding, EmbeddingExtractor, decode, normalize_l2, validate};
use crate::error::EmbedError;

/// 颜色布局 + 颜色直方图特征
///
/// 图片缩放到 size x size 后：
/// - 划分为 grid x grid 个格子，计算每个格子的 RGB 均值，并减去全图均值
/// - 统计 bins^3 个格子的 RGB 联合直方图，取平方根（Hellinger 形式）
///
/// 两部分拼接后做 L2 归一化，维度为 3 * grid^2 + bins^3
#[derive(Debug, Clone)]
pub struct ColorLayoutExtractor {
    size: u32,
    grid: u32,
    bins: u32,
}

impl ColorLayoutExtractor {
    pub fn new(size: u32, grid: u32, bins: u32) -> Self {
        assert!(grid > 0 && grid <= size, "grid must be in 1..=size");
        assert!(bins > 0 && bins <= 256, "bins must be in 1..=256");
        Self { size, grid, bins }
    }
}

impl Default for ColorLayoutExtractor {
    fn default() -> Self {
        Self::new(224, 8, 4)
    }
}

impl EmbeddingExtractor for ColorLayoutExtractor {
    fn model_id(&self) -> String {
        format!("color-layout-v1-s{}-g{}-b{}", self.size, self.grid, self.bins)
    }

    fn dim(&self) -> usize {
        let (g, b) = (self.grid as usize, self.bins as usize);
        3 * g * g + b * b * b
    }

    fn embed(&self, bytes: &[u8]) -> Result<Embedding, EmbedError> {
        let image = decode(bytes)?;
        let rgb = image.resize_exact(self.size, self.size, FilterType::Triangle).to_rgb8();

        let (n, g, b) = (self.size as usize, self.grid as usize, self.bins as usize);
        let mut cells = vec![[0f64; 3]; g * g];
        let mut counts = vec![0usize; g * g];
        let mut hist = vec![0f64; b * b * b];
        let mut mean = [0f64; 3];

        let quantize = |v: u8| v as usize * b / 256;
        for (x, y, px) in rgb.enumerate_pixels() {
            let cell = (y as usize * g / n) * g + x as usize * g / n;
            counts[cell] += 1;
            for c in 0..3 {
                let v = px[c] as f64 / 255.0;
                cells[cell][c] += v;
                mean[c] += v;
            }
            hist[(quantize(px[0]) * b + quantize(px[1])) * b + quantize(px[2])] += 1.0;
        }

        let total = (n * n) as f64;
        mean.iter_mut().for_each(|m| *m /= total);

        let mut out = Vec::with_capacity(self.dim());
        // 布局部分按 1/grid 缩放，使其整体量级与直方图部分接近
        let weight = 1.0 / g as f64;
        for (cell, &count) in cells.iter().zip(&counts) {
            for c in 0..3 {
                out.push(((cell[c] / count as f64 - mean[c]) * weight) as f32);
            }
        }
        out.extend(hist.iter().map(|h| (h / total).sqrt() as f32));

        normalize_l2(&mut out);
        validate(&out, self.dim())?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::testing::png;
    use crate::ranker::cosine_similarity;

    fn extractor() -> ColorLayoutExtractor {
        ColorLayoutExtractor::new(32, 4, 4)
    }

    #[test]
    fn test_dim_and_model_id() {
        let e = ColorLayoutExtractor::default();
        assert_eq!(e.dim(), 3 * 64 + 64);
        assert_eq!(e.model_id(), "color-layout-v1-s224-g8-b4");
    }

    #[test]
    fn test_embed_dim() {
        let e = extractor();
        let v = e.embed(&png(40, 30, |x, _| [x as u8 * 6, 0, 0])).unwrap();
        assert_eq!(v.len(), e.dim());
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embed_deterministic() {
        let e = extractor();
        let data = png(20, 20, |x, y| [x as u8 * 10, y as u8 * 10, 128]);
        assert_eq!(e.embed(&data).unwrap(), e.embed(&data).unwrap());
    }

    #[test]
    fn test_embed_garbage() {
        let e = extractor();
        assert!(matches!(e.embed(b"not an image"), Err(EmbedError::Decode(_))));
        assert!(matches!(e.embed(&[]), Err(EmbedError::Decode(_))));
    }

    #[test]
    fn test_similar_images_score_higher() {
        let e = extractor();
        let gradient = |r: u8| move |x: u32, _: u32| [r, (x * 8) as u8, 0];
        let a = e.embed(&png(32, 32, gradient(200))).unwrap();
        let b = e.embed(&png(32, 32, gradient(210))).unwrap();
        let c = e.embed(&png(32, 32, |_, y| [0, 0, (y * 8) as u8])).unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_uniform_image_is_not_zero() {
        let e = extractor();
        let v = e.embed(&png(16, 16, |_, _| [50, 50, 50])).unwrap();
        assert!(v.iter().any(|&x| x != 0.0));
    }

    #[test]
    #[should_panic(expected = "grid must be in 1..=size")]
    fn test_invalid_grid() {
        ColorLayoutExtractor::new(4, 8, 4);
    }
}
