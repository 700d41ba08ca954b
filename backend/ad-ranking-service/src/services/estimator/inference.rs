/// Inference backend client
///
/// Named-model batch prediction: field name → tensor in, output name →
/// tensor out. `TfServingClient` speaks the TF-Serving REST predict API.
use async_trait::async_trait;
use ndarray::Array2;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed inference response: {0}")]
    Decode(String),
}

/// Dense two-dimensional tensor, `[batch, width]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float(Array2<f32>),
    Int64(Array2<i64>),
    Text(Array2<String>),
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float(a) => a.shape(),
            Tensor::Int64(a) => a.shape(),
            Tensor::Text(a) => a.shape(),
        }
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Tensor::Float(_) => "float",
            Tensor::Int64(_) => "int64",
            Tensor::Text(_) => "string",
        }
    }

    /// Row-major nested JSON arrays
    fn to_json(&self) -> Value {
        fn rows<T: Clone + Into<Value>>(a: &Array2<T>) -> Value {
            Value::Array(a.rows().into_iter().map(|r| Value::from(r.to_vec())).collect())
        }
        match self {
            Tensor::Float(a) => rows(a),
            Tensor::Int64(a) => rows(a),
            Tensor::Text(a) => rows(a),
        }
    }

    fn from_json(value: &Value) -> Result<Self, InferenceError> {
        let rows: Vec<Vec<&Value>> = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Array(inner) => inner.iter().collect(),
                    scalar => vec![scalar],
                })
                .collect(),
            scalar => vec![vec![scalar]],
        };

        let batch = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(InferenceError::Decode("ragged output tensor".to_string()));
        }
        let flat: Vec<&Value> = rows.into_iter().flatten().collect();
        let shape_err = |e: ndarray::ShapeError| InferenceError::Decode(e.to_string());

        if flat.iter().all(|v| v.is_number()) {
            let values = flat
                .iter()
                .map(|v| v.as_f64().unwrap_or_default() as f32)
                .collect();
            Ok(Tensor::Float(
                Array2::from_shape_vec((batch, width), values).map_err(shape_err)?,
            ))
        } else if flat.iter().all(|v| v.is_string()) {
            let values = flat
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect();
            Ok(Tensor::Text(
                Array2::from_shape_vec((batch, width), values).map_err(shape_err)?,
            ))
        } else {
            Err(InferenceError::Decode(
                "output tensor has mixed or non-scalar elements".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub model_name: String,
    pub inputs: BTreeMap<String, Tensor>,
}

#[derive(Debug, Clone, Default)]
pub struct PredictResponse {
    pub outputs: HashMap<String, Tensor>,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn predict(&self, request: PredictRequest) -> Result<PredictResponse, InferenceError>;
}

/// TF-Serving REST client (`POST /v1/models/{name}:predict`)
pub struct TfServingClient {
    client: reqwest::Client,
    base_url: String,
    /// Name given to a bare (unnamed) output
    default_output: String,
}

impl TfServingClient {
    pub fn new(
        base_url: impl Into<String>,
        default_output: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_output: default_output.into(),
        })
    }

    fn encode_request(request: &PredictRequest) -> Value {
        let inputs: Map<String, Value> = request
            .inputs
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.to_json()))
            .collect();
        json!({ "inputs": inputs })
    }

    fn decode_response(&self, body: &Value) -> Result<PredictResponse, InferenceError> {
        let outputs = body
            .get("outputs")
            .ok_or_else(|| InferenceError::Decode("response has no outputs".to_string()))?;

        let mut response = PredictResponse::default();
        match outputs {
            Value::Object(named) => {
                for (name, value) in named {
                    response
                        .outputs
                        .insert(name.clone(), Tensor::from_json(value)?);
                }
            }
            single => {
                response
                    .outputs
                    .insert(self.default_output.clone(), Tensor::from_json(single)?);
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl InferenceBackend for TfServingClient {
    async fn predict(&self, request: PredictRequest) -> Result<PredictResponse, InferenceError> {
        let url = format!("{}/v1/models/{}:predict", self.base_url, request.model_name);
        debug!(url = %url, fields = request.inputs.len(), "Calling inference backend");

        let resp = self
            .client
            .post(&url)
            .json(&Self::encode_request(&request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        self.decode_response(&body)
    }
}
