use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::indexer::IndexerOptions;
use crate::library::{DEFAULT_IMAGE_SUFFIX, SuffixFilter};
use crate::similarity::SearchMode;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "aloxaf", "imsimilar").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

#[derive(Args, Debug, Clone)]
pub struct IndexOptions {
    /// 每个批次处理的图片数量
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub chunk_size: usize,
    /// 批次内同时计算的图片数量，默认为 CPU 核数
    #[arg(long, value_name = "N")]
    pub parallelism: Option<usize>,
    /// 批次之间的等待时间（毫秒）
    #[arg(long, value_name = "MS", default_value_t = 50)]
    pub chunk_delay_ms: u64,
    /// 单张图片的解码超时（毫秒）
    #[arg(long, value_name = "MS", default_value_t = 10000)]
    pub decode_timeout_ms: u64,
    /// 识别为图片的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_IMAGE_SUFFIX)]
    pub suffix: String,
    /// 嵌入模型文件（.npy 投影矩阵），不指定则只使用像素特征
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,
}

impl IndexOptions {
    pub fn indexer_options(&self) -> anyhow::Result<IndexerOptions> {
        Ok(IndexerOptions {
            chunk_size: self.chunk_size.max(1),
            parallelism: self.parallelism.unwrap_or_else(num_cpus::get).max(1),
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            decode_timeout: Duration::from_millis(self.decode_timeout_ms),
            suffix: SuffixFilter::new(&self.suffix)?,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchOptions {
    /// 评分方式
    #[arg(long, value_enum, default_value_t = SearchMode::Hybrid)]
    pub mode: SearchMode,
    /// 最低相似度，范围从 0 到 100
    #[arg(long, value_name = "PERCENT", default_value_t = 50, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub threshold: u8,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 20)]
    pub count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imsimilar", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imsimilar 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图库并计算指纹
    Index(IndexCommand),
    /// 在图库中搜索相似图片
    Search(SearchCommand),
    /// 清理失效的缓存记录
    Clean(CleanCommand),
    /// 显示图片的指纹
    Show(ShowCommand),
    /// 显示缓存统计
    Stats(StatsCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回图库对应的缓存文件路径
    ///
    /// 文件名取图库路径的 blake3 哈希，不同图库互不影响
    pub fn cache_file(&self, library_path: &str) -> PathBuf {
        let hash = blake3::hash(library_path.as_bytes()).to_hex();
        self.path.join("cache").join(format!("{}.json", &hash[..16]))
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
