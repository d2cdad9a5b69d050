mod clean;
mod index;
mod search;
mod show;
mod stats;

pub use clean::*;
pub use index::*;
pub use search::*;
pub use show::*;
pub use stats::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
