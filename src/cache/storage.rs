use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use tempfile::NamedTempFile;

use crate::error::Result;

/// 缓存文档的持久化方式
///
/// `save` 必须整体替换旧文档
pub trait DocumentStorage: Send + Sync {
    /// 读取文档，不存在时返回 None
    fn load(&self) -> Result<Option<Vec<u8>>>;
    fn save(&self, data: &[u8]) -> Result<()>;
}

/// JSON 文件存储，先写临时文件再重命名
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!("写入缓存 {} ({} 字节)", self.path.display(), data.len());
        Ok(())
    }
}

/// 内存存储，记录写入次数
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data: Mutex::new(Some(data)), writes: AtomicUsize::new(0) }
    }

    /// 已执行的写入次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DocumentStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.data())
    }

    fn save(&self, data: &[u8]) -> Result<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = Some(data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_json_file_storage_replace() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("cache").join("lib.json"));
        assert_eq!(storage.load().unwrap(), None);

        storage.save(b"{\"a\":1}").unwrap();
        storage.save(b"{}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some(&b"{}"[..]));
        assert_eq!(std::fs::read(storage.path()).unwrap(), b"{}");

        // 不残留临时文件
        let files = std::fs::read_dir(dir.path().join("cache")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_memory_storage_counts_writes() {
        let storage = MemoryStorage::new();
        storage.save(b"1").unwrap();
        storage.save(b"2").unwrap();
        assert_eq!(storage.writes(), 2);
        assert_eq!(storage.data(), Some(b"2".to_vec()));
    }
}
