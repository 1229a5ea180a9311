use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::*;

#[derive(Parser, Debug, Clone)]
pub struct DetectorOptions {
    /// 手部关键点 ONNX 模型路径
    #[arg(long, value_name = "FILE", env = "SIGNPREP_MODEL", default_value = "hand_landmark.onnx")]
    pub model: PathBuf,
    /// 模型输入图片的边长
    #[arg(long, value_name = "N", default_value_t = 224)]
    pub input_size: u32,
    /// 模型输入张量的排列方式
    #[arg(long, value_enum, default_value_t = TensorLayout::Nhwc)]
    pub layout: TensorLayout,
    /// 手部存在置信度阈值，低于该值视为未检测到手
    #[arg(long, value_name = "SCORE", default_value_t = 0.5)]
    pub min_confidence: f32,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "signprep", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 不显示进度条，同时不再预先统计图片总数
    #[arg(long, global = true)]
    pub no_progress: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 按手部检测结果将图片划分为 clean / rejected 两组
    Filter(FilterCommand),
    /// 提取 60 维关键点特征，并生成分层抽样的训练 / 验证 / 测试集
    Vectorize(VectorizeCommand),
    /// 使用已训练的分类器对一组关键点进行预测
    Predict(PredictCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [1, H, W, 3]
    Nhwc,
    /// [1, 3, H, W]
    Nchw,
}
