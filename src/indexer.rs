//! 两阶段索引
//!
//! 1. 指纹阶段：按批次并发计算 pHash 和直方图
//! 2. 嵌入阶段：嵌入模型就绪时逐张计算嵌入向量
//!
//! 同一时间只允许一次索引。停止请求只在批次之间检查，已写入的结果不会丢失。

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::cache::{CacheStore, FingerprintRecord};
use crate::embedding::EmbeddingCapability;
use crate::error::Result;
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::library::{LibraryItem, SuffixFilter};
use crate::utils;

const PHASE_NONE: u8 = 0;
const PHASE_FINGERPRINT: u8 = 1;
const PHASE_EMBEDDING: u8 = 2;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Fingerprint,
    Embedding,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fingerprint => f.write_str("fingerprint"),
            Self::Embedding => f.write_str("embedding"),
        }
    }
}

/// 进度回调的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub phase: Phase,
}

pub type ProgressFn<'a> = &'a (dyn Fn(Progress) + Send + Sync);

/// 当前索引状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingState {
    /// 未运行时为 None
    pub phase: Option<Phase>,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// 指纹阶段每批处理的图片数量
    pub chunk_size: usize,
    /// 批次内的最大并发数
    pub parallelism: usize,
    /// 批次之间的等待时间
    pub chunk_delay: Duration,
    /// 单张图片的解码超时
    pub decode_timeout: Duration,
    /// 识别图片的扩展名
    pub suffix: SuffixFilter,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            parallelism: num_cpus::get().min(10),
            chunk_delay: Duration::from_millis(50),
            decode_timeout: Duration::from_secs(10),
            suffix: SuffixFilter::default(),
        }
    }
}

/// 单个阶段的统计
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseReport {
    /// 该阶段涉及的图片总数，包括之前已完成的
    pub total: usize,
    /// 本次处理的图片数量
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// 清理的失效记录数量
    pub pruned: usize,
    pub fingerprint: PhaseReport,
    /// 嵌入阶段被跳过时为 None
    pub embedding: Option<PhaseReport>,
}

pub struct Indexer {
    cache: Arc<CacheStore>,
    fingerprinter: Arc<dyn Fingerprinter>,
    embedder: Arc<dyn EmbeddingCapability>,
    options: IndexerOptions,
    running: AtomicBool,
    cancel: AtomicBool,
    phase: AtomicU8,
}

/// 索引运行期间持有，结束时重置状态
struct RunGuard<'a>(&'a Indexer);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.phase.store(PHASE_NONE, Ordering::SeqCst);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl Indexer {
    pub fn new(
        cache: Arc<CacheStore>,
        fingerprinter: Arc<dyn Fingerprinter>,
        embedder: Arc<dyn EmbeddingCapability>,
        options: IndexerOptions,
    ) -> Self {
        Self {
            cache,
            fingerprinter,
            embedder,
            options,
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            phase: AtomicU8::new(PHASE_NONE),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> Option<Phase> {
        match self.phase.load(Ordering::SeqCst) {
            PHASE_FINGERPRINT => Some(Phase::Fingerprint),
            PHASE_EMBEDDING => Some(Phase::Embedding),
            _ => None,
        }
    }

    pub fn state(&self) -> IndexingState {
        IndexingState {
            phase: self.current_phase(),
            cancel_requested: self.cancel.load(Ordering::SeqCst),
        }
    }

    /// 请求停止，当前批次完成后生效
    pub fn request_stop(&self) {
        if self.is_running() {
            info!("收到停止请求，将在当前批次完成后停止");
        }
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// 开始新的一次索引，清除之前的停止请求
    fn try_start(&self) -> Option<RunGuard<'_>> {
        let guard = self.try_acquire()?;
        self.cancel.store(false, Ordering::SeqCst);
        Some(guard)
    }

    /// 占用索引器，保留停止请求
    fn try_acquire(&self) -> Option<RunGuard<'_>> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("索引已在运行，忽略本次请求");
            return None;
        }
        Some(RunGuard(self))
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn is_image(&self, item: &LibraryItem) -> bool {
        self.options.suffix.is_match(&item.ext)
    }

    /// 运行完整索引，已有索引在运行时返回 None
    ///
    /// 指纹阶段结束时嵌入模型已就绪，则继续运行嵌入阶段
    pub async fn run(&self, items: &[LibraryItem], progress: ProgressFn<'_>) -> Option<IndexReport> {
        let _guard = self.try_start()?;

        let valid_ids = items.iter().map(|item| item.id.clone()).collect::<HashSet<_>>();
        let pruned = self.cache.prune_orphans(&valid_ids);

        let fingerprint = self.fingerprint_phase(items, progress).await;

        let embedding = if fingerprint.cancelled {
            None
        } else if self.embedder.is_ready() {
            Some(self.embedding_phase(items, progress).await)
        } else {
            info!("嵌入模型未就绪，跳过嵌入阶段");
            None
        };

        Some(IndexReport { pruned, fingerprint, embedding })
    }

    /// 只运行嵌入阶段，用于模型在指纹阶段之后才就绪的情况
    ///
    /// 已有索引在运行或模型未就绪时返回 None
    pub async fn run_embedding(&self, items: &[LibraryItem], progress: ProgressFn<'_>) -> Option<PhaseReport> {
        if !self.embedder.is_ready() {
            info!("嵌入模型未就绪，跳过嵌入阶段");
            return None;
        }
        let _guard = self.try_start()?;
        Some(self.embedding_phase(items, progress).await)
    }

    /// 在 [`Indexer::run`] 之后继续运行嵌入阶段
    ///
    /// 与 `run_embedding` 不同，之前的停止请求仍然有效：已请求停止时直接返回 None
    pub async fn resume_embedding(&self, items: &[LibraryItem], progress: ProgressFn<'_>) -> Option<PhaseReport> {
        if !self.embedder.is_ready() {
            info!("嵌入模型未就绪，跳过嵌入阶段");
            return None;
        }
        let _guard = self.try_acquire()?;
        if self.cancelled() {
            info!("已请求停止，跳过嵌入阶段");
            return None;
        }
        Some(self.embedding_phase(items, progress).await)
    }

    async fn fingerprint_phase(&self, items: &[LibraryItem], progress: ProgressFn<'_>) -> PhaseReport {
        self.phase.store(PHASE_FINGERPRINT, Ordering::SeqCst);

        let images = items.iter().filter(|item| self.is_image(item)).collect::<Vec<_>>();
        let pending = images
            .iter()
            .copied()
            .filter(|item| !self.cache.is_fingerprint_complete(&item.id))
            .collect::<Vec<_>>();

        let total = images.len();
        let mut done = total - pending.len();
        let mut report = PhaseReport { total, ..Default::default() };
        info!("指纹阶段: 共 {} 张图片，待处理 {} 张", total, pending.len());

        let chunk_size = self.options.chunk_size.max(1);
        let parallelism = self.options.parallelism.clamp(1, chunk_size);
        let chunks = pending.chunks(chunk_size).collect::<Vec<_>>();
        for (i, chunk) in chunks.iter().enumerate() {
            if self.cancelled() {
                info!("指纹阶段已停止，完成 {}/{}", done, total);
                report.cancelled = true;
                break;
            }

            let mut results = futures::stream::iter(chunk.iter().copied())
                .map(|item| async move { (item, self.fingerprint_item(item.pixel_source()).await) })
                .buffer_unordered(parallelism)
                .boxed();

            while let Some((item, result)) = results.next().await {
                report.processed += 1;
                match result {
                    Ok(fingerprint) => {
                        self.put_fingerprint(item, fingerprint);
                        report.succeeded += 1;
                    }
                    Err(e) => {
                        warn!("跳过图片 {}: {}", item.id, e);
                        report.failed += 1;
                    }
                }
            }

            done += chunk.len();
            debug!("指纹阶段: {}/{}", done, total);
            progress(Progress { processed: done, total, phase: Phase::Fingerprint });

            if i + 1 < chunks.len() && !self.options.chunk_delay.is_zero() {
                tokio::time::sleep(self.options.chunk_delay).await;
            }
        }

        if chunks.is_empty() {
            progress(Progress { processed: done, total, phase: Phase::Fingerprint });
        }
        // 最后一个批次之后收到的停止请求同样生效
        if self.cancelled() {
            report.cancelled = true;
        }

        self.flush().await;
        info!("指纹阶段完成: 成功 {}，失败 {}", report.succeeded, report.failed);
        report
    }

    async fn embedding_phase(&self, items: &[LibraryItem], progress: ProgressFn<'_>) -> PhaseReport {
        self.phase.store(PHASE_EMBEDDING, Ordering::SeqCst);

        let candidates = items
            .iter()
            .filter(|item| self.is_image(item) && self.cache.is_fingerprint_complete(&item.id))
            .collect::<Vec<_>>();
        let pending = candidates
            .iter()
            .copied()
            .filter(|item| !self.cache.is_embedding_complete(&item.id))
            .collect::<Vec<_>>();

        let total = candidates.len();
        let mut done = total - pending.len();
        let mut report = PhaseReport { total, ..Default::default() };
        info!("嵌入阶段: 共 {} 张图片，待处理 {} 张", total, pending.len());

        for item in &pending {
            if self.cancelled() {
                info!("嵌入阶段已停止，完成 {}/{}", done, total);
                report.cancelled = true;
                break;
            }

            report.processed += 1;
            match self.embed_item(item.pixel_source()).await {
                Ok(embedding) if !embedding.is_empty() => {
                    // 只追加嵌入，保留已有的指纹
                    if let Some(mut record) = self.cache.get(&item.id) {
                        record.embedding = Some(embedding);
                        self.cache.put(item.id.clone(), record);
                        report.succeeded += 1;
                    } else {
                        warn!("跳过图片 {}: 记录已被删除", item.id);
                        report.failed += 1;
                    }
                }
                Ok(_) => {
                    warn!("跳过图片 {}: 嵌入向量为空", item.id);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("跳过图片 {}: {}", item.id, e);
                    report.failed += 1;
                }
            }

            done += 1;
            progress(Progress { processed: done, total, phase: Phase::Embedding });
            tokio::task::yield_now().await;
        }

        if pending.is_empty() {
            progress(Progress { processed: done, total, phase: Phase::Embedding });
        }

        self.flush().await;
        info!("嵌入阶段完成: 成功 {}，失败 {}", report.succeeded, report.failed);
        report
    }

    async fn fingerprint_item(&self, path: &Path) -> Result<Fingerprint> {
        let fingerprinter = self.fingerprinter.clone();
        utils::run_with_timeout(path.to_path_buf(), self.options.decode_timeout, move |path| {
            fingerprinter.fingerprint_file(path)
        })
        .await
    }

    async fn embed_item(&self, path: &Path) -> Result<Vec<f32>> {
        let embedder = self.embedder.clone();
        utils::run_with_timeout(path.to_path_buf(), self.options.decode_timeout, move |path| {
            let image = utils::imread(path)?;
            embedder.compute_embedding(&image)
        })
        .await
    }

    /// 写入新指纹，不会清除已有的嵌入
    fn put_fingerprint(&self, item: &LibraryItem, fingerprint: Fingerprint) {
        let embedding = self.cache.get(&item.id).and_then(|record| record.embedding);
        let record = FingerprintRecord {
            phash: fingerprint.phash,
            color_histogram: fingerprint.histogram,
            embedding,
            ext: item.ext.clone(),
        };
        self.cache.put(item.id.clone(), record);
    }

    /// 在阻塞线程池中写入缓存
    async fn flush(&self) {
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("缓存写入失败，稍后重试: {e}"),
            Err(e) => error!("缓存写入任务失败: {e}"),
        }
    }
}
