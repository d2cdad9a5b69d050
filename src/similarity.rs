//! 相似度评分与排序
//!
//! 三种模式：
//! - Pixel: 0.6 * pHash + 0.4 * 直方图
//! - Semantic: 仅使用嵌入向量
//! - Hybrid: 双方都有嵌入时 0.25 * pHash + 0.15 * 直方图 + 0.6 * 嵌入，否则退化为 Pixel

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::cache::FingerprintRecord;
use crate::fingerprint::Fingerprint;
use crate::hamming::phash_score;

const PIXEL_WEIGHTS: (f32, f32) = (0.6, 0.4);
const HYBRID_WEIGHTS: (f32, f32, f32) = (0.25, 0.15, 0.6);

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// 感知哈希 + 颜色直方图
    Pixel,
    /// 嵌入向量
    Semantic,
    /// 混合评分，缺少嵌入时退化为 Pixel
    #[default]
    Hybrid,
}

/// 被搜索图片的描述，不会写入缓存
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDescriptor {
    pub phash: String,
    pub color_histogram: Vec<f32>,
    pub embedding: Option<Vec<f32>>,
}

impl QueryDescriptor {
    pub fn new(fingerprint: Fingerprint, embedding: Option<Vec<f32>>) -> Self {
        Self { phash: fingerprint.phash, color_histogram: fingerprint.histogram, embedding }
    }
}

impl From<&FingerprintRecord> for QueryDescriptor {
    fn from(record: &FingerprintRecord) -> Self {
        Self {
            phash: record.phash.clone(),
            color_histogram: record.color_histogram.clone(),
            embedding: record.embedding.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub item_id: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    /// 最低相似度，百分比
    pub threshold_percent: f32,
    pub max_results: usize,
    /// 排除的记录，通常是被搜索图片本身
    pub exclude_id: Option<String>,
    pub mode: SearchMode,
}

/// 直方图的余弦相似度，长度不一致或任意一方为零向量时为 0
pub fn histogram_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).unwrap_or(0.)
}

/// 嵌入相似度，将余弦相似度从 [-1, 1] 映射到 [0, 1]
///
/// 向量已经归一化，直接使用点积
pub fn embedding_score(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    if !dot.is_finite() {
        return 0.;
    }
    (dot.clamp(-1., 1.) + 1.) / 2.
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0. || nb == 0. {
        return None;
    }
    let cos = dot / (na.sqrt() * nb.sqrt());
    cos.is_finite().then_some(cos)
}

fn pixel_score(query: &QueryDescriptor, candidate: &FingerprintRecord) -> (f32, f32) {
    let phash = phash_score(Some(&query.phash), Some(&candidate.phash));
    let hist = histogram_similarity(&query.color_histogram, &candidate.color_histogram);
    (phash, hist)
}

/// 计算综合评分，范围 [0, 1]
pub fn combined_score(query: &QueryDescriptor, candidate: &FingerprintRecord, mode: SearchMode) -> f32 {
    let embeddings = query.embedding.as_deref().zip(candidate.embedding.as_deref());
    let score = match (mode, embeddings) {
        (SearchMode::Pixel, _) | (SearchMode::Hybrid, None) => {
            let (phash, hist) = pixel_score(query, candidate);
            PIXEL_WEIGHTS.0 * phash + PIXEL_WEIGHTS.1 * hist
        }
        (SearchMode::Semantic, None) => 0.,
        (SearchMode::Semantic, Some((a, b))) => embedding_score(a, b),
        (SearchMode::Hybrid, Some((a, b))) => {
            let (phash, hist) = pixel_score(query, candidate);
            HYBRID_WEIGHTS.0 * phash + HYBRID_WEIGHTS.1 * hist + HYBRID_WEIGHTS.2 * embedding_score(a, b)
        }
    };
    score.clamp(0., 1.)
}

/// 候选记录是否包含该模式必需的字段
fn is_candidate(record: &FingerprintRecord, mode: SearchMode) -> bool {
    match mode {
        SearchMode::Pixel => !record.phash.is_empty(),
        SearchMode::Semantic => record.is_embedding_complete(),
        SearchMode::Hybrid => !record.phash.is_empty() || record.is_embedding_complete(),
    }
}

/// 对所有候选记录评分，返回按分数降序排列的结果
///
/// 分数相同时保持候选的原始顺序
pub fn find_similar<'a, I>(query: &QueryDescriptor, candidates: I, params: &SearchParams) -> Vec<ScoredResult>
where
    I: IntoIterator<Item = (&'a str, &'a FingerprintRecord)>,
{
    let threshold = params.threshold_percent / 100.;
    let mut results = candidates
        .into_iter()
        .filter(|(id, _)| params.exclude_id.as_deref() != Some(*id))
        .filter(|(_, record)| is_candidate(record, params.mode))
        .map(|(id, record)| ScoredResult {
            item_id: id.to_string(),
            score: combined_score(query, record, params.mode),
        })
        .filter(|result| result.score >= threshold)
        .collect::<Vec<_>>();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(params.max_results);
    results
}
