//! 图片指纹：感知哈希 + 颜色直方图
//!
//! 感知哈希对缩放、轻微压缩和小幅色偏不敏感，但对裁剪和旋转敏感。

use std::path::Path;

use image::DynamicImage;

use crate::error::Result;
use crate::utils;

/// pHash 计算时的缩放尺寸
pub const PHASH_SIZE: u32 = 32;
/// pHash 每行的分块数量，每块 2x2 像素，共 256 块
pub const PHASH_BLOCKS: u32 = 16;
/// 直方图计算时的缩放尺寸
pub const HISTOGRAM_SIZE: u32 = 64;
/// 直方图的 bin 数量，每个通道 4 个
pub const HISTOGRAM_BINS: usize = 64;
/// 不透明度低于该值的像素不计入直方图
pub const ALPHA_THRESHOLD: u8 = 128;

/// 一张图片的指纹
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// 256 位感知哈希，64 个十六进制字符
    pub phash: String,
    /// 归一化的 64 维颜色直方图
    pub histogram: Vec<f32>,
}

/// 指纹计算器，索引器通过它计算图片指纹
pub trait Fingerprinter: Send + Sync {
    /// 读取图片并计算指纹，解码失败时返回 `Error::Decode`
    fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint>;

    /// 计算已解码图片的指纹
    fn fingerprint_image(&self, image: &DynamicImage) -> Fingerprint {
        compute_fingerprint(image)
    }
}

/// 默认的指纹计算器
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFingerprinter;

impl Fingerprinter for ImageFingerprinter {
    fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint> {
        let image = utils::imread(path)?;
        Ok(self.fingerprint_image(&image))
    }
}

/// 并行计算 pHash 和直方图
pub fn compute_fingerprint(image: &DynamicImage) -> Fingerprint {
    let (phash, histogram) =
        rayon::join(|| compute_phash(image), || compute_histogram(image));
    Fingerprint { phash, histogram }
}

/// 计算 256 位感知哈希
///
/// 缩放到 32x32 灰度图，按 2x2 分块求平均亮度，
/// 亮度高于所有块中位数的记为 1，否则为 0。
pub fn compute_phash(image: &DynamicImage) -> String {
    let gray = image.thumbnail_exact(PHASH_SIZE, PHASH_SIZE).to_luma8();
    let block = PHASH_SIZE / PHASH_BLOCKS;

    let mut means = Vec::with_capacity((PHASH_BLOCKS * PHASH_BLOCKS) as usize);
    for by in 0..PHASH_BLOCKS {
        for bx in 0..PHASH_BLOCKS {
            let mut sum = 0u32;
            for y in by * block..(by + 1) * block {
                for x in bx * block..(bx + 1) * block {
                    sum += gray.get_pixel(x, y).0[0] as u32;
                }
            }
            means.push(sum as f32 / (block * block) as f32);
        }
    }

    let median = median(&means);
    let mut bytes = vec![0u8; means.len() / 8];
    for (i, &mean) in means.iter().enumerate() {
        if mean > median {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
    }
    hex::encode(bytes)
}

/// 计算 4x4x4 的 RGB 颜色直方图，忽略透明像素
///
/// 没有可见像素时返回全 0 向量
pub fn compute_histogram(image: &DynamicImage) -> Vec<f32> {
    let rgba = image.thumbnail_exact(HISTOGRAM_SIZE, HISTOGRAM_SIZE).to_rgba8();
    let mut bins = [0u32; HISTOGRAM_BINS];
    let mut counted = 0u32;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < ALPHA_THRESHOLD {
            continue;
        }
        bins[histogram_bin(r, g, b)] += 1;
        counted += 1;
    }
    if counted == 0 {
        return vec![0.; HISTOGRAM_BINS];
    }
    bins.iter().map(|&n| n as f32 / counted as f32).collect()
}

#[inline(always)]
fn histogram_bin(r: u8, g: u8, b: u8) -> usize {
    ((r as usize >> 6) << 4) | ((g as usize >> 6) << 2) | (b as usize >> 6)
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2. } else { sorted[mid] }
}
