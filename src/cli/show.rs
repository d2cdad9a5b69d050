use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::fingerprint::{Fingerprinter, ImageFingerprinter};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 图片路径
    pub image: PathBuf,
    /// 同时显示为零的直方图区间
    #[arg(long)]
    pub all_bins: bool,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let fingerprint = block_in_place(|| ImageFingerprinter.fingerprint_file(&self.image))?;

        println!("pHash: {}", fingerprint.phash);
        for (bin, value) in fingerprint.histogram.iter().enumerate() {
            if *value == 0. && !self.all_bins {
                continue;
            }
            // 区间编号的 6 位依次为 R G B 各 2 位
            let (r, g, b) = (bin >> 4, (bin >> 2) & 3, bin & 3);
            println!("{:2} ({},{},{})\t{:.4}", bin, r, g, b, value);
        }
        Ok(())
    }
}
