//! 单次关键点分类
//!
//! 请求和响应的格式与 API 网关的代理事件一致，本模块只负责处理单个事件，不包含网络服务。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::detector::NUM_KEYPOINTS;
use crate::landmark::{FEATURE_DIM, normalize_flat};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

const CORS_HEADERS: [(&str, &str); 4] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
    ("Content-Type", "application/json"),
];

static MODEL: OnceLock<LinearModel> = OnceLock::new();

/// 加载全局分类器，只在第一次调用时读取文件，之后直接返回已加载的模型
pub fn global_model(path: &Path) -> Result<&'static LinearModel> {
    if let Some(model) = MODEL.get() {
        return Ok(model);
    }
    let model = LinearModel::load(path)?;
    info!("已加载分类器 {}，共 {} 个类别", path.display(), model.labels().len());
    Ok(MODEL.get_or_init(|| model))
}

#[derive(Deserialize)]
struct LinearModelFile {
    labels: Vec<String>,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// softmax 线性分类器
///
/// 模型文件为 JSON：`{"labels": [...], "weights": [[60 个浮点数], ...], "bias": [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "LinearModelFile")]
pub struct LinearModel {
    labels: Vec<String>,
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl TryFrom<LinearModelFile> for LinearModel {
    type Error = anyhow::Error;

    fn try_from(file: LinearModelFile) -> Result<Self> {
        let k = file.labels.len();
        if k == 0 {
            bail!("模型不包含任何类别");
        }
        if file.weights.len() != k || file.bias.len() != k {
            bail!("权重或偏置数量与类别数量 {} 不一致", k);
        }
        if let Some(row) = file.weights.iter().find(|row| row.len() != FEATURE_DIM) {
            bail!("权重维度应为 {}，实际为 {}", FEATURE_DIM, row.len());
        }
        let weights = Array2::from_shape_vec((k, FEATURE_DIM), file.weights.concat())?;
        Ok(Self { labels: file.labels, weights, bias: Array1::from(file.bias) })
    }
}

impl LinearModel {
    pub fn new(labels: Vec<String>, weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weights.dim() != (labels.len(), FEATURE_DIM) || bias.len() != labels.len() {
            bail!("模型形状不一致");
        }
        Ok(Self { labels, weights, bias })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("无法读取模型 {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("无法解析模型 {}", path.display()))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// 各类别的概率
    pub fn predict_proba(&self, x: &[f32; FEATURE_DIM]) -> Array1<f32> {
        let logits = self.weights.dot(&ArrayView1::from(&x[..])) + &self.bias;
        let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let exp = logits.mapv(|v| (v - max).exp());
        let sum = exp.sum();
        exp / sum
    }

    /// 返回概率最大的类别及其概率
    pub fn predict(&self, x: &[f32; FEATURE_DIM]) -> Result<(&str, f32)> {
        let proba = self.predict_proba(x);
        let (index, &confidence) = proba
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .context("模型输出为空")?;
        if !confidence.is_finite() {
            bail!("模型输出无效的概率");
        }
        Ok((&self.labels[index], confidence))
    }
}

/// 输入事件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceEvent {
    #[serde(rename = "httpMethod", default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// 输出响应，`body` 为 JSON 字符串
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: BTreeMap<&'static str, &'static str>,
    pub body: String,
}

impl InferenceResponse {
    fn new(status_code: u16, body: Value) -> Self {
        Self { status_code, headers: CORS_HEADERS.into_iter().collect(), body: body.to_string() }
    }

    fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(status_code, json!({ "error": message.into() }))
    }

    /// 解析 `body` 字段
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// 请求体格式错误
struct BadRequest(String);

/// 从请求体中解析 63 个浮点数
fn parse_landmarks(body: Option<&str>) -> Result<Vec<f32>, BadRequest> {
    let body: Value = serde_json::from_str(body.unwrap_or("{}"))
        .map_err(|e| BadRequest(format!("invalid JSON body: {e}")))?;
    let landmarks = match body.get("landmarks") {
        Some(Value::Array(values)) => values,
        Some(Value::Null) | None => {
            return Err(BadRequest(format!(
                "landmarks must be {} floats, received: 0",
                NUM_KEYPOINTS * 3
            )));
        }
        Some(_) => return Err(BadRequest("landmarks must be an array".to_string())),
    };
    if landmarks.len() != NUM_KEYPOINTS * 3 {
        return Err(BadRequest(format!(
            "landmarks must be {} floats, received: {}",
            NUM_KEYPOINTS * 3,
            landmarks.len()
        )));
    }
    landmarks
        .iter()
        .map(|v| v.as_f64().map(|v| v as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| BadRequest("landmarks must contain only numbers".to_string()))
}

/// 处理单个事件
///
/// - `OPTIONS`：CORS 预检，返回 200
/// - 非 `POST`：返回 405
/// - 关键点格式错误：返回 400
/// - 模型计算失败：返回 500
pub fn handle(model: &LinearModel, event: &InferenceEvent) -> InferenceResponse {
    debug!("收到事件: {:?}", event);
    match event.http_method.as_deref() {
        Some("OPTIONS") => {
            return InferenceResponse::new(STATUS_OK, json!({ "message": "CORS pre-flight OK" }));
        }
        Some("POST") => {}
        _ => return InferenceResponse::error(STATUS_METHOD_NOT_ALLOWED, "Method not allowed"),
    }

    let raw = match parse_landmarks(event.body.as_deref()) {
        Ok(raw) => raw,
        Err(BadRequest(message)) => return InferenceResponse::error(STATUS_BAD_REQUEST, message),
    };
    // 长度已经检查过
    let Some(features) = normalize_flat(&raw) else {
        return InferenceResponse::error(STATUS_BAD_REQUEST, "invalid landmarks");
    };
    debug!("归一化特征: {:?}", features);

    match model.predict(&features) {
        Ok((label, confidence)) => InferenceResponse::new(
            STATUS_OK,
            json!({ "prediction": label, "confidence": confidence }),
        ),
        Err(e) => InferenceResponse::error(STATUS_INTERNAL_ERROR, format!("{e:#}")),
    }
}

/// 处理未解析的事件 JSON，事件本身格式错误时返回 400
pub fn handle_json(model: &LinearModel, text: &str) -> InferenceResponse {
    match serde_json::from_str::<InferenceEvent>(text) {
        Ok(event) => handle(model, &event),
        Err(e) => InferenceResponse::error(STATUS_BAD_REQUEST, format!("invalid event: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::normalize;

    /// 两个类别：第 0 维特征越大越倾向于 "B"
    fn model() -> LinearModel {
        let mut weights = Array2::zeros((2, FEATURE_DIM));
        weights[[0, 0]] = -4.0;
        weights[[1, 0]] = 4.0;
        LinearModel::new(vec!["A".into(), "B".into()], weights, Array1::zeros(2)).unwrap()
    }

    fn landmarks() -> Vec<f32> {
        (0..NUM_KEYPOINTS)
            .flat_map(|i| {
                let i = i as f32;
                [0.2 + 0.03 * i, 0.7 - 0.02 * i, 0.001 * i]
            })
            .collect()
    }

    fn post(body: Value) -> InferenceEvent {
        InferenceEvent { http_method: Some("POST".into()), body: Some(body.to_string()) }
    }

    #[test]
    fn test_options_preflight() {
        let event = InferenceEvent { http_method: Some("OPTIONS".into()), body: None };
        let resp = handle(&model(), &event);
        assert_eq!(resp.status_code, STATUS_OK);
        assert_eq!(resp.json()["message"], "CORS pre-flight OK");
        assert_eq!(resp.headers["Access-Control-Allow-Origin"], "*");
    }

    #[test]
    fn test_method_not_allowed() {
        for method in [Some("GET".to_string()), Some("PUT".to_string()), None] {
            let event = InferenceEvent { http_method: method, body: None };
            let resp = handle(&model(), &event);
            assert_eq!(resp.status_code, STATUS_METHOD_NOT_ALLOWED);
            assert_eq!(resp.json()["error"], "Method not allowed");
        }
    }

    #[test]
    fn test_bad_requests() {
        let short = landmarks()[..62].to_vec();
        let resp = handle(&model(), &post(json!({ "landmarks": short })));
        assert_eq!(resp.status_code, STATUS_BAD_REQUEST);
        assert!(resp.json()["error"].as_str().unwrap().contains("received: 62"));

        let resp = handle(&model(), &post(json!({})));
        assert_eq!(resp.status_code, STATUS_BAD_REQUEST);

        let mut mixed = json!(landmarks());
        mixed[3] = json!("x");
        let resp = handle(&model(), &post(json!({ "landmarks": mixed })));
        assert_eq!(resp.status_code, STATUS_BAD_REQUEST);

        let event = InferenceEvent { http_method: Some("POST".into()), body: Some("{oops".into()) };
        assert_eq!(handle(&model(), &event).status_code, STATUS_BAD_REQUEST);
    }

    #[test]
    fn test_malformed_event() {
        assert_eq!(handle_json(&model(), "{oops").status_code, STATUS_BAD_REQUEST);
        // body 应当是 JSON 字符串而不是对象
        let event = json!({ "httpMethod": "POST", "body": { "landmarks": landmarks() } });
        let resp = handle_json(&model(), &event.to_string());
        assert_eq!(resp.status_code, STATUS_BAD_REQUEST);
        assert_eq!(resp.headers["Access-Control-Allow-Origin"], "*");

        let event = post(json!({ "landmarks": landmarks() }));
        let text = json!({ "httpMethod": "POST", "body": event.body }).to_string();
        assert_eq!(handle_json(&model(), &text).status_code, STATUS_OK);
    }

    #[test]
    fn test_prediction() {
        let resp = handle(&model(), &post(json!({ "landmarks": landmarks() })));
        assert_eq!(resp.status_code, STATUS_OK);
        let body = resp.json();
        // 第 0 维特征（1 号关键点相对手腕的 x）为正，倾向于 "B"
        assert_eq!(body["prediction"], "B");
        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.5..=1.0).contains(&confidence));
    }

    #[test]
    fn test_normalization_parity() {
        // 推理端与特征提取端使用相同的归一化结果
        let raw = landmarks();
        let mut kps = [[0.0; 3]; NUM_KEYPOINTS];
        for (kp, xyz) in kps.iter_mut().zip(raw.chunks_exact(3)) {
            kp.copy_from_slice(xyz);
        }
        let features = normalize_flat(&raw).unwrap();
        assert_eq!(features, normalize(&kps));

        let m = model();
        let proba = m.predict_proba(&features);
        assert!((proba.sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_model_from_json() {
        let mut weights = vec![vec![0.0; FEATURE_DIM]; 2];
        weights[1][0] = 1.0;
        let text = json!({ "labels": ["A", "B"], "weights": weights, "bias": [0.0, 0.0] });
        let model: LinearModel = serde_json::from_value(text).unwrap();
        assert_eq!(model.labels(), ["A", "B"]);

        let bad = json!({ "labels": ["A"], "weights": [[0.0, 1.0]], "bias": [0.0] });
        assert!(serde_json::from_value::<LinearModel>(bad).is_err());
    }
}
