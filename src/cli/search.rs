use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::warn;
use serde::Serialize;

use crate::ImSimBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat, SearchOptions};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 图库目录
    pub library: PathBuf,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 嵌入模型文件，应与索引时使用的模型相同
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Serialize)]
struct SearchRow {
    score: f32,
    id: String,
    path: PathBuf,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImSimBuilder::new(opts.conf_dir.clone(), &self.library)
            .model(self.model.clone())
            .open();

        if self.model.is_some() && !db.init_embedding().await {
            warn!("嵌入模型加载失败，只使用像素特征");
        }

        let result = db
            .search_image(
                &self.image,
                self.search.mode,
                self.search.threshold as f32,
                self.search.count,
            )
            .await?;

        let rows = result
            .into_iter()
            .map(|r| SearchRow { score: r.score * 100., path: db.item_path(&r.item_id), id: r.item_id })
            .collect::<Vec<_>>();

        print_result(&rows, self)
    }
}

fn print_result(rows: &[SearchRow], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?)
        }
        OutputFormat::Table => {
            for row in rows {
                println!("{:.2}\t{}", row.score, row.path.display());
            }
        }
    }
    Ok(())
}
