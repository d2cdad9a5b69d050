use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::cache::{CacheStats, CacheStore, DEFAULT_DEBOUNCE, DocumentStorage, JsonFileStorage};
use crate::config::ConfDir;
use crate::embedding::{EmbeddingCapability, NoEmbedding, ProjectionEmbedder};
use crate::error::Result;
use crate::fingerprint::{Fingerprinter, ImageFingerprinter};
use crate::indexer::{IndexReport, Indexer, IndexerOptions, ProgressFn};
use crate::library::{self, LibraryItem};
use crate::similarity::{QueryDescriptor, ScoredResult, SearchMode, SearchParams, find_similar};
use crate::utils;

pub struct ImSimBuilder {
    conf_dir: ConfDir,
    library: PathBuf,
    options: IndexerOptions,
    debounce: Duration,
    model: Option<PathBuf>,
    fingerprinter: Arc<dyn Fingerprinter>,
    embedder: Option<Arc<dyn EmbeddingCapability>>,
    storage: Option<Arc<dyn DocumentStorage>>,
}

impl ImSimBuilder {
    pub fn new(conf_dir: ConfDir, library: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir,
            library: library.into(),
            options: IndexerOptions::default(),
            debounce: DEFAULT_DEBOUNCE,
            model: None,
            fingerprinter: Arc::new(ImageFingerprinter),
            embedder: None,
            storage: None,
        }
    }

    pub fn options(mut self, options: IndexerOptions) -> Self {
        self.options = options;
        self
    }

    /// 缓存延迟写入时间
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// 嵌入模型文件，未指定时不使用嵌入
    pub fn model(mut self, model: Option<PathBuf>) -> Self {
        self.model = model;
        self
    }

    pub fn fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingCapability>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 替换默认的缓存文件
    pub fn storage(mut self, storage: Arc<dyn DocumentStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 打开图库对应的缓存
    ///
    /// 嵌入模型不会在这里加载，见 [`ImSim::init_embedding`]
    pub fn open(self) -> ImSim {
        let library = std::fs::canonicalize(&self.library).unwrap_or(self.library);
        let library_path = library.to_string_lossy().to_string();

        let storage: Arc<dyn DocumentStorage> = match self.storage {
            Some(storage) => storage,
            None => {
                let storage = JsonFileStorage::new(self.conf_dir.cache_file(&library_path));
                debug!("缓存文件: {}", storage.path().display());
                Arc::new(storage)
            }
        };
        let cache = Arc::new(CacheStore::open(storage, &library_path).with_debounce(self.debounce));

        let embedder: Arc<dyn EmbeddingCapability> = match (self.embedder, &self.model) {
            (Some(embedder), _) => embedder,
            (None, Some(_)) => Arc::new(ProjectionEmbedder::new()),
            (None, None) => Arc::new(NoEmbedding),
        };

        let indexer = Arc::new(Indexer::new(
            cache.clone(),
            self.fingerprinter.clone(),
            embedder.clone(),
            self.options.clone(),
        ));

        ImSim {
            library,
            cache,
            indexer,
            fingerprinter: self.fingerprinter,
            embedder,
            model: self.model,
            decode_timeout: self.options.decode_timeout,
        }
    }
}

/// 一个图库的相似图片搜索
pub struct ImSim {
    library: PathBuf,
    cache: Arc<CacheStore>,
    indexer: Arc<Indexer>,
    fingerprinter: Arc<dyn Fingerprinter>,
    embedder: Arc<dyn EmbeddingCapability>,
    model: Option<PathBuf>,
    decode_timeout: Duration,
}

impl ImSim {
    pub fn library(&self) -> &Path {
        &self.library
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// 扫描图库中的所有文件
    pub fn library_items(&self) -> Vec<LibraryItem> {
        library::scan_library(&self.library)
    }

    /// 加载嵌入模型，返回是否就绪
    pub async fn init_embedding(&self) -> bool {
        match &self.model {
            Some(model) => self.embedder.init(model).await,
            None => self.embedder.is_ready(),
        }
    }

    /// 索引图库
    ///
    /// 嵌入模型与指纹阶段同时加载；模型在指纹阶段结束后才就绪时，再继续运行嵌入阶段，
    /// 期间收到的停止请求仍然有效。已有索引在运行时返回 None。
    pub async fn index(&self, items: &[LibraryItem], progress: ProgressFn<'_>) -> Option<IndexReport> {
        let (ready, report) = tokio::join!(self.init_embedding(), self.indexer.run(items, progress));
        let mut report = report?;
        if ready && report.embedding.is_none() && !report.fingerprint.cancelled {
            report.embedding = self.indexer.resume_embedding(items, progress).await;
        }
        Some(report)
    }

    /// 计算被搜索图片的描述，结果不会写入缓存
    ///
    /// 嵌入计算失败时只丢弃嵌入，搜索会退化为像素模式
    pub async fn query_descriptor(&self, image: &Path) -> Result<QueryDescriptor> {
        let fingerprinter = self.fingerprinter.clone();
        let embedder = self.embedder.clone();
        utils::run_with_timeout(image.to_path_buf(), self.decode_timeout, move |path| {
            let image = utils::imread(path)?;
            let fingerprint = fingerprinter.fingerprint_image(&image);
            let embedding = if embedder.is_ready() {
                embedder
                    .compute_embedding(&image)
                    .inspect_err(|e| warn!("被搜索图片的嵌入计算失败: {e}"))
                    .ok()
            } else {
                None
            };
            Ok(QueryDescriptor::new(fingerprint, embedding))
        })
        .await
    }

    /// 对缓存中的所有记录评分
    pub fn search(&self, query: &QueryDescriptor, params: &SearchParams) -> Vec<ScoredResult> {
        let start = Instant::now();
        let results = self.cache.read_items(|items| {
            find_similar(query, items.iter().map(|(id, record)| (id.as_str(), record)), params)
        });
        debug!("搜索用时: {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
        results
    }

    /// 搜索与图片相似的图库条目
    ///
    /// 图片本身在图库中时会被排除
    pub async fn search_image(
        &self,
        image: &Path,
        mode: SearchMode,
        threshold_percent: f32,
        max_results: usize,
    ) -> Result<Vec<ScoredResult>> {
        let query = self.query_descriptor(image).await?;
        if query.embedding.is_none() {
            match mode {
                SearchMode::Hybrid => info!("被搜索图片没有嵌入向量，退化为像素模式"),
                SearchMode::Semantic => warn!("被搜索图片没有嵌入向量，语义模式的评分均为 0"),
                SearchMode::Pixel => {}
            }
        }
        let exclude_id = std::fs::canonicalize(image)
            .ok()
            .and_then(|path| library::item_id(&self.library, &path));
        let params = SearchParams { threshold_percent, max_results, exclude_id, mode };
        Ok(self.search(&query, &params))
    }

    /// 条目 ID 对应的文件路径
    pub fn item_path(&self, id: &str) -> PathBuf {
        id.split('/').fold(self.library.clone(), |path, part| path.join(part))
    }

    /// 按当前图库内容清理失效记录
    pub fn prune(&self, items: &[LibraryItem]) -> Result<usize> {
        let valid_ids = items.iter().map(|item| item.id.clone()).collect::<HashSet<_>>();
        let removed = self.cache.prune_orphans(&valid_ids);
        self.cache.flush()?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        self.cache.clear()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// 停止索引并写入缓存，退出前必须调用
    pub fn close(&self) -> Result<()> {
        self.indexer.request_stop();
        self.cache.flush()
    }
}
