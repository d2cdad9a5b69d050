use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::ImSimBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat};

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 图库目录
    pub library: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = ImSimBuilder::new(opts.conf_dir.clone(), &self.library).open();
        let stats = db.stats();
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            OutputFormat::Table => {
                println!("图库    : {}", db.library().display());
                println!("记录    : {}", stats.total);
                println!("指纹    : {}", stats.fingerprinted);
                println!("嵌入    : {}", stats.embedded);
            }
        }
        Ok(())
    }
}
