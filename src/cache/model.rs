use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 缓存文档的结构版本，版本不一致时整个缓存作废
pub const CACHE_VERSION: u32 = 1;

/// 单张图片的指纹记录
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FingerprintRecord {
    /// 感知哈希，64 个十六进制字符
    #[serde(rename = "pHash", default)]
    pub phash: String,
    /// 64 维颜色直方图
    #[serde(rename = "colorHistogram", default)]
    pub color_histogram: Vec<f32>,
    /// 归一化的嵌入向量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// 图片扩展名
    #[serde(default)]
    pub ext: String,
}

impl FingerprintRecord {
    /// pHash 和直方图均已计算
    pub fn is_fingerprint_complete(&self) -> bool {
        !self.phash.is_empty() && !self.color_histogram.is_empty()
    }

    pub fn is_embedding_complete(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// 持久化的缓存文档，每个图库一份
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheDocument {
    pub version: u32,
    #[serde(rename = "libraryPath")]
    pub library_path: String,
    #[serde(default)]
    pub items: BTreeMap<String, FingerprintRecord>,
}

impl CacheDocument {
    pub fn new(library_path: impl Into<String>) -> Self {
        Self { version: CACHE_VERSION, library_path: library_path.into(), items: BTreeMap::new() }
    }

    /// 文档是否属于当前版本和图库
    pub fn is_valid_for(&self, library_path: &str) -> bool {
        self.version == CACHE_VERSION && self.library_path == library_path
    }
}

/// 缓存统计
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub fingerprinted: usize,
    pub embedded: usize,
}
