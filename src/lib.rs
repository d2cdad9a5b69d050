pub mod cache;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod hamming;
pub mod imsim;
pub mod indexer;
pub mod library;
pub mod similarity;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use imsim::{ImSim, ImSimBuilder};
