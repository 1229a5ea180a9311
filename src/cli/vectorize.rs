use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{DetectorOptions, Opts};
use crate::dataset::{DatasetTable, SPLIT_SEED, SplitSchemes, write_dataset};
use crate::detector::OnnxHandDetector;
use crate::pool::{WorkerPool, chunk_size_for, worker_count};
use crate::utils::{collect_images, progress_bar};
use crate::vectorize::vectorize_images;

const VECTORIZE_HEADROOM: usize = 1;

#[derive(Parser, Debug, Clone)]
pub struct VectorizeCommand {
    #[command(flatten)]
    pub detector: DetectorOptions,
    /// 过滤后的图片目录
    #[arg(long, value_name = "DIR", default_value = "../data/filtered/clean")]
    pub input: PathBuf,
    /// 特征表和划分文件的输出目录
    #[arg(long, value_name = "DIR", default_value = "../data/processed")]
    pub output: PathBuf,
    /// 每个工作线程每块处理的图片占总数的百分比
    #[arg(long, value_name = "P", default_value_t = 7)]
    pub chunk_pct: usize,
}

impl SubCommandExtend for VectorizeCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let show_progress = !opts.no_progress;
        let (images, total) = collect_images(&self.input, show_progress)?;
        let workers = worker_count(VECTORIZE_HEADROOM);
        // NOTE: 不统计总数时无法计算分块大小，退化为逐张分发
        let chunk_size = total.map_or(1, |total| chunk_size_for(total, self.chunk_pct, workers));
        let pool = WorkerPool::new(workers, chunk_size);
        info!("开始提取特征 {}，工作线程 {}，分块大小 {}", self.input.display(), workers, chunk_size);

        let pb = progress_bar("提取", total, show_progress);
        let (rows, summary) =
            vectorize_images(images, &pool, || OnnxHandDetector::load(&self.detector), &pb)?;
        pb.finish_and_clear();

        let table = DatasetTable::from_rows(rows);
        let schemes = SplitSchemes::compute(&table, SPLIT_SEED);
        write_dataset(&table, &schemes, &self.output)?;

        println!("{summary}");
        println!("输出目录: {}", self.output.display());
        Ok(())
    }
}
