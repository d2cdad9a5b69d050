use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::{ImSimBuilder, Opts};

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    /// 图库目录
    pub library: PathBuf,
    /// 清理所有缓存，由于不需要扫描图库，速度更快
    #[arg(long)]
    pub all: bool,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = ImSimBuilder::new(opts.conf_dir.clone(), &self.library).open();
        info!("清理缓存中……");
        if self.all {
            block_in_place(|| db.clear())?;
            println!("已清空缓存");
        } else {
            let items = block_in_place(|| db.library_items());
            let removed = block_in_place(|| db.prune(&items))?;
            println!("已清理 {} 条失效记录", removed);
        }
        info!("清理完成");
        Ok(())
    }
}
