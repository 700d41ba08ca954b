/// Model spec and tensor batch construction
///
/// The model spec names the model, its output, and the field dictionary
/// `name → {field_type, field_max_length, field_seq_length}` used to lay out
/// the input batch.
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::error;

use super::inference::Tensor;
use super::EstimatorError;
use crate::metrics::{self, ErrorSite};
use crate::services::features::extract::{FLOAT_FIELDS, INT_FIELDS, SEQUENCE_FIELDS};
use crate::services::features::ModelFeatures;

#[derive(Debug, Error)]
pub enum ModelSpecError {
    #[error("failed to read model spec {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model spec: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Float,
    Int,
    Sequence,
}

impl FromStr for FieldType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(FieldType::Float),
            "int" => Ok(FieldType::Int),
            "sequence" => Ok(FieldType::Sequence),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_type: String,
    /// Bucket count for int and sequence fields
    #[serde(default)]
    pub field_max_length: i64,
    #[serde(default)]
    pub field_seq_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub output: String,
    pub fields: BTreeMap<String, FieldSpec>,
}

const DEFAULT_BUCKETS: i64 = 100_000;
const DEFAULT_SEQ_LENGTH: usize = 20;

impl ModelSpec {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelSpecError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelSpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelSpecError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Dictionary covering every field produced by feature extraction
    pub fn builtin(name: impl Into<String>, output: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        for field in FLOAT_FIELDS {
            fields.insert(
                field.to_string(),
                FieldSpec {
                    field_type: "float".to_string(),
                    field_max_length: 0,
                    field_seq_length: 0,
                },
            );
        }
        for field in INT_FIELDS {
            let buckets = match *field {
                "req_hour" => 25,
                "is_auto_download" | "user_gender" => 4,
                "user_age" => 128,
                _ => DEFAULT_BUCKETS,
            };
            fields.insert(
                field.to_string(),
                FieldSpec {
                    field_type: "int".to_string(),
                    field_max_length: buckets,
                    field_seq_length: 0,
                },
            );
        }
        for field in SEQUENCE_FIELDS {
            fields.insert(
                field.to_string(),
                FieldSpec {
                    field_type: "sequence".to_string(),
                    field_max_length: DEFAULT_BUCKETS,
                    field_seq_length: DEFAULT_SEQ_LENGTH,
                },
            );
        }

        Self {
            name: name.into(),
            output: output.into(),
            fields,
        }
    }

    /// Lay out one tensor per field over the batch, in record order.
    ///
    /// Field types are resolved up front; an unknown type fails the batch.
    pub fn build_batch(
        &self,
        features: &[ModelFeatures],
    ) -> Result<BTreeMap<String, Tensor>, EstimatorError> {
        let mut resolved = Vec::with_capacity(self.fields.len());
        for (name, spec) in &self.fields {
            let field_type = spec.field_type.parse::<FieldType>().map_err(|_| {
                metrics::record_error(ErrorSite::TfFeatureType);
                error!(field = %name, field_type = %spec.field_type, "Invalid feature type");
                EstimatorError::UnknownFieldType {
                    field: name.clone(),
                    field_type: spec.field_type.clone(),
                }
            })?;
            resolved.push((name, spec, field_type));
        }

        let mut inputs = BTreeMap::new();
        for (name, spec, field_type) in resolved {
            let tensor = match field_type {
                FieldType::Float => fill_float(name, features),
                FieldType::Int => fill_int(name, spec, features),
                FieldType::Sequence => fill_sequence(name, spec, features),
            };
            inputs.insert(name.clone(), tensor);
        }
        Ok(inputs)
    }
}

/// Reduce `v` into `[1, max - 1]`; zero stays zero.
pub fn bucket(v: i64, max: i64) -> i64 {
    if v == 0 {
        0
    } else {
        v.rem_euclid(max - 1) + 1
    }
}

fn effective_max_length(name: &str, configured: i64) -> i64 {
    if configured <= 1 {
        metrics::record_error(ErrorSite::FieldMaxLen);
        error!(field = %name, field_max_length = configured, "Invalid field_max_length");
        2
    } else {
        configured
    }
}

fn fill_float(name: &str, features: &[ModelFeatures]) -> Tensor {
    let values = features
        .iter()
        .map(|f| f.float_features.get(name).copied().unwrap_or(0.0))
        .collect::<Vec<_>>();
    Tensor::Float(column(values))
}

fn fill_int(name: &str, spec: &FieldSpec, features: &[ModelFeatures]) -> Tensor {
    let max = effective_max_length(name, spec.field_max_length);
    let values = features
        .iter()
        .map(|f| f.int_features.get(name).map(|v| bucket(*v, max)).unwrap_or(0))
        .collect::<Vec<_>>();
    Tensor::Int64(column(values))
}

fn fill_sequence(name: &str, spec: &FieldSpec, features: &[ModelFeatures]) -> Tensor {
    let max = effective_max_length(name, spec.field_max_length);
    let width = spec.field_seq_length;
    let empty: Vec<i64> = Vec::new();

    let mut tensor = Array2::<i64>::zeros((features.len(), width));
    for (row, f) in features.iter().enumerate() {
        let values = f.sequence_features.get(name).unwrap_or(&empty);
        for (col, v) in values.iter().take(width).enumerate() {
            tensor[[row, col]] = bucket(*v, max);
        }
    }
    Tensor::Int64(tensor)
}

fn column<T>(values: Vec<T>) -> Array2<T> {
    Array1::from(values).insert_axis(Axis(1))
}
