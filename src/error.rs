use std::path::PathBuf;

/// 索引与搜索过程中可能出现的错误
///
/// 这些错误都不会导致进程退出：解码失败的图片会被跳过，
/// 嵌入不可用时退化为像素搜索，缓存写入失败则等待下一次写入重试。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 图片无法读取、格式不支持或解码超时
    #[error("无法解码图片 {}: {}", .path.display(), .reason)]
    Decode { path: PathBuf, reason: String },
    /// 嵌入模型未就绪，或单次计算失败
    #[error("嵌入不可用: {0}")]
    EmbeddingUnavailable(String),
    /// 缓存文件读写失败
    #[error("缓存读写失败: {0}")]
    CacheIo(#[from] std::io::Error),
    /// 缓存文档序列化失败
    #[error("缓存序列化失败: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

impl Error {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode { path: path.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
