//! 指纹缓存
//!
//! 每个图库对应一份文档，整体读写。修改后延迟写入，多次修改合并为一次，
//! 所有者在退出前必须调用 [`CacheStore::flush`]。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, spawn_blocking};

pub mod model;
pub mod storage;

pub use model::*;
pub use storage::*;

use crate::error::{Error, Result};

/// 默认的延迟写入时间
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

struct CacheState {
    doc: CacheDocument,
    dirty: bool,
}

struct Shared {
    state: Mutex<CacheState>,
    storage: Arc<dyn DocumentStorage>,
    // 保证写入按顺序进行，不会用旧文档覆盖新文档
    write_lock: Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 文档有修改时整体写入
    fn write(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let data = {
            let mut state = self.state();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            serde_json::to_vec(&state.doc)
        };
        let result = data.map_err(Error::from).and_then(|data| self.storage.save(&data));
        if result.is_err() {
            // 内存中的数据仍然有效，等待下一次写入
            self.state().dirty = true;
        }
        result
    }
}

pub struct CacheStore {
    shared: Arc<Shared>,
    debounce: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CacheStore {
    /// 打开缓存
    ///
    /// 已保存的文档版本或图库路径不一致时丢弃全部记录，从空文档开始
    pub fn open(storage: Arc<dyn DocumentStorage>, library_path: &str) -> Self {
        let doc = match storage.load() {
            Ok(Some(data)) => match serde_json::from_slice::<CacheDocument>(&data) {
                Ok(doc) if doc.is_valid_for(library_path) => {
                    info!("加载缓存: {} 条记录", doc.items.len());
                    doc
                }
                Ok(doc) => {
                    info!(
                        "缓存已失效 (版本 {} / {}, 图库 {})，重新建立",
                        doc.version, CACHE_VERSION, doc.library_path
                    );
                    CacheDocument::new(library_path)
                }
                Err(e) => {
                    warn!("缓存文件无法解析，重新建立: {e}");
                    CacheDocument::new(library_path)
                }
            },
            Ok(None) => {
                debug!("缓存不存在，创建空缓存");
                CacheDocument::new(library_path)
            }
            Err(e) => {
                warn!("读取缓存失败，使用空缓存: {e}");
                CacheDocument::new(library_path)
            }
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState { doc, dirty: false }),
                storage,
                write_lock: Mutex::new(()),
            }),
            debounce: DEFAULT_DEBOUNCE,
            timer: Mutex::new(None),
        }
    }

    /// 设置延迟写入时间
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn library_path(&self) -> String {
        self.shared.state().doc.library_path.clone()
    }

    pub fn get(&self, id: &str) -> Option<FingerprintRecord> {
        self.shared.state().doc.items.get(id).cloned()
    }

    pub fn is_fingerprint_complete(&self, id: &str) -> bool {
        self.shared.state().doc.items.get(id).is_some_and(FingerprintRecord::is_fingerprint_complete)
    }

    pub fn is_embedding_complete(&self, id: &str) -> bool {
        self.shared.state().doc.items.get(id).is_some_and(FingerprintRecord::is_embedding_complete)
    }

    /// 替换记录并安排延迟写入
    pub fn put(&self, id: impl Into<String>, record: FingerprintRecord) {
        {
            let mut state = self.shared.state();
            state.doc.items.insert(id.into(), record);
            state.dirty = true;
        }
        self.schedule_flush();
    }

    /// 删除不在 `valid_ids` 中的记录，返回删除数量
    pub fn prune_orphans(&self, valid_ids: &HashSet<String>) -> usize {
        let removed = {
            let mut state = self.shared.state();
            let before = state.doc.items.len();
            state.doc.items.retain(|id, _| valid_ids.contains(id));
            let removed = before - state.doc.items.len();
            if removed > 0 {
                state.dirty = true;
            }
            removed
        };
        if removed > 0 {
            info!("清理 {removed} 条失效记录");
            self.schedule_flush();
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.shared.state().doc.items.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state();
        let items = state.doc.items.values();
        CacheStats {
            total: state.doc.items.len(),
            fingerprinted: items.clone().filter(|r| r.is_fingerprint_complete()).count(),
            embedded: items.filter(|r| r.is_embedding_complete()).count(),
        }
    }

    /// 在锁内读取全部记录，`f` 中不能再访问缓存
    pub fn read_items<R>(&self, f: impl FnOnce(&BTreeMap<String, FingerprintRecord>) -> R) -> R {
        f(&self.shared.state().doc.items)
    }

    /// 清空所有记录并立即写入
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            state.doc.items.clear();
            state.dirty = true;
        }
        self.flush()
    }

    /// 取消等待中的延迟写入，有修改时立即写入
    pub fn flush(&self) -> Result<()> {
        if let Some(timer) = self.timer().take() {
            timer.abort();
        }
        self.shared.write()
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 重置延迟写入计时器
    fn schedule_flush(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!("没有运行中的 tokio runtime，等待显式 flush");
            return;
        };
        let shared = self.shared.clone();
        let delay = self.debounce;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            match spawn_blocking(move || shared.write()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("缓存写入失败，稍后重试: {e}"),
                Err(e) => error!("缓存写入任务失败: {e}"),
            }
        });
        if let Some(old) = self.timer().replace(task) {
            old.abort();
        }
    }
}
