use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{DetectorOptions, Opts};
use crate::detector::OnnxHandDetector;
use crate::filter::{Partitioner, filter_images};
use crate::pool::{WorkerPool, worker_count};
use crate::utils::{collect_images, progress_bar};

/// 为主线程和系统保留的 CPU 核心数
const FILTER_HEADROOM: usize = 2;

#[derive(Parser, Debug, Clone)]
pub struct FilterCommand {
    #[command(flatten)]
    pub detector: DetectorOptions,
    /// 原始图片目录，结构为 `<input>/<类别>/*.jpg`
    #[arg(long, value_name = "DIR", default_value = "../data/raw/asl_alphabet_train")]
    pub input: PathBuf,
    /// 输出目录，图片会被复制到其下的 clean 或 rejected 目录
    #[arg(long, value_name = "DIR", default_value = "../data/filtered")]
    pub output: PathBuf,
    /// 每个任务块包含的图片数量
    #[arg(long, value_name = "N", default_value_t = 500)]
    pub chunk_size: usize,
}

impl SubCommandExtend for FilterCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let show_progress = !opts.no_progress;
        let (images, total) = collect_images(&self.input, show_progress)?;
        let partitioner = Partitioner::new(&self.output)?;
        let pool = WorkerPool::new(worker_count(FILTER_HEADROOM), self.chunk_size);
        info!("开始过滤 {}，工作线程 {}", self.input.display(), pool.workers());

        let pb = progress_bar("过滤", total, show_progress);
        let summary =
            filter_images(images, &partitioner, &pool, || OnnxHandDetector::load(&self.detector), &pb)?;
        pb.finish_and_clear();

        info!("clean 目录: {}", partitioner.clean_root().display());
        info!("rejected 目录: {}", partitioner.rejected_root().display());
        println!("{summary}");
        Ok(())
    }
}
