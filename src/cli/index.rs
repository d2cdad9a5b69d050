use std::path::PathBuf;

use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::ImSimBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{IndexOptions, Opts};
use crate::indexer::{PhaseReport, Progress};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    /// 图库目录
    pub library: PathBuf,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImSimBuilder::new(opts.conf_dir.clone(), &self.library)
            .options(self.index.indexer_options()?)
            .model(self.index.model.clone())
            .open();

        let items = block_in_place(|| db.library_items());

        // 第一次 Ctrl-C 等待当前批次完成，已完成的结果仍会写入缓存；再次按下则立即退出
        let stop = tokio::spawn({
            let indexer = db.indexer().clone();
            async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                indexer.request_stop();
                warn!("正在停止索引，再次按 Ctrl-C 强制退出");
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("强制退出，最近的修改可能没有写入缓存");
                    std::process::exit(130);
                }
            }
        });

        let pb = ProgressBar::no_length().with_style(pb_style());
        let progress = |p: Progress| {
            pb.set_message(p.phase.to_string());
            pb.set_length(p.total as u64);
            pb.set_position(p.processed as u64);
        };

        let report = db.index(&items, &progress).await;
        stop.abort();
        pb.finish_and_clear();

        block_in_place(|| db.close())?;

        let Some(report) = report else {
            warn!("该图库已有索引在运行");
            return Ok(());
        };

        info!("清理失效记录 {} 条", report.pruned);
        print_phase("指纹", &report.fingerprint);
        match &report.embedding {
            Some(embedding) => print_phase("嵌入", embedding),
            None => println!("嵌入: 已跳过"),
        }
        Ok(())
    }
}

fn print_phase(name: &str, report: &PhaseReport) {
    println!(
        "{}: 共 {} 张，本次处理 {} 张，成功 {}，失败 {}{}",
        name,
        report.total,
        report.processed,
        report.succeeded,
        report.failed,
        if report.cancelled { "（已中断）" } else { "" },
    );
}
