mod filter;
mod predict;
mod vectorize;

pub use filter::*;
pub use predict::*;
pub use vectorize::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
