use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{DynamicImage, ImageReader};
use indicatif::ProgressStyle;
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};

/// 读取并解码图片，格式根据文件内容猜测
pub fn imread(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| Error::decode(path, e))?
        .decode()
        .map_err(|e| Error::decode(path, e))
}

/// 在阻塞线程池中执行 `f`，超时视为解码失败
///
/// 超时后后台线程不会被中断，只是结果被丢弃
pub async fn run_with_timeout<T, F>(path: PathBuf, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T> + Send + 'static,
{
    let task_path = path.clone();
    let task = spawn_blocking(move || f(&task_path));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::decode(path, e)),
        Err(_) => Err(Error::decode(path, format!("解码超时 ({}ms)", timeout.as_millis()))),
    }
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}
