use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::inference::{global_model, handle_json};

#[derive(Parser, Debug, Clone)]
pub struct PredictCommand {
    /// 分类器模型文件
    #[arg(long, value_name = "FILE", env = "MODEL_PATH", default_value = "model.json")]
    pub model_path: PathBuf,
    /// 事件 JSON 文件，省略时从标准输入读取
    #[arg(value_name = "EVENT")]
    pub event: Option<PathBuf>,
}

impl SubCommandExtend for PredictCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let text = match &self.event {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("无法读取事件 {}", path.display()))?,
            None => {
                let mut text = String::new();
                std::io::stdin().read_to_string(&mut text).context("无法读取标准输入")?;
                text
            }
        };
        let model = global_model(&self.model_path)?;
        let response = handle_json(model, &text);
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }
}
