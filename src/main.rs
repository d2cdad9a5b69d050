use clap::Parser;
use log::debug;

use imsimilar::Opts;
use imsimilar::cli::SubCommandExtend;
use imsimilar::config::SubCommand;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    debug!("配置目录: {}", opts.conf_dir.path().display());

    match &opts.subcmd {
        SubCommand::Index(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Clean(config) => config.run(&opts).await,
        SubCommand::Show(config) => config.run(&opts).await,
        SubCommand::Stats(config) => config.run(&opts).await,
    }
}
