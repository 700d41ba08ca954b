/// CTR / CVR Estimation
///
/// Two interchangeable CTR strategies, chosen once per request:
/// - **Model**: tensor batch → inference backend → one probability per record
/// - **Statistics**: 7-day click-through cascade (creative → package → category)
///
/// CVR always uses the statistics cascade.
pub mod inference;
pub mod tensor;

pub use inference::{InferenceBackend, InferenceError, PredictRequest, TfServingClient};
pub use tensor::{FieldSpec, FieldType, ModelSpec, ModelSpecError};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use self::inference::Tensor;
use crate::metrics::{self, ErrorSite, StageTimer};
use crate::models::{AdRequest, CountFeatures, FeatureRecord};
use crate::services::features::extract_model_features;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("unknown field type {field_type:?} for field {field}")]
    UnknownFieldType { field: String, field_type: String },

    #[error("inference call failed: {0}")]
    Transport(#[from] InferenceError),

    #[error("inference timed out after {0}ms")]
    Timeout(u64),

    #[error("model output {0} not found")]
    MissingOutput(String),

    #[error("model output {name} has type {dtype}, expected float")]
    DataType { name: String, dtype: &'static str },

    #[error("model output has {actual} values for {expected} records")]
    TensorSize { expected: usize, actual: usize },
}

const STATS_CTR_MIN_IMP: f64 = 500.0;
const STATS_CTR_DEFAULT: f64 = 0.05;
const STATS_CVR_MIN_CLICK: f64 = 300.0;
const STATS_CVR_DEFAULT: f64 = 0.003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrStrategy {
    Model,
    Statistics,
}

impl CtrStrategy {
    /// `stats_ctr == 1` selects the statistics cascade
    pub fn for_request(request: &AdRequest) -> Self {
        if request.exp_flag("stats_ctr") == Some(1) {
            CtrStrategy::Statistics
        } else {
            CtrStrategy::Model
        }
    }
}

fn cascade_levels(record: &FeatureRecord) -> [CountFeatures; 3] {
    let counters = &record.ad_counter;
    [
        counters.c_id.seven_day(),
        counters.ad_package_name.seven_day(),
        counters.ad_package_category.seven_day(),
    ]
}

/// First level with more than 500 impressions wins; else 0.05.
pub fn stats_ctr(record: &FeatureRecord) -> f64 {
    cascade_levels(record)
        .iter()
        .find(|c| c.imp > STATS_CTR_MIN_IMP)
        .map(|c| c.click / c.imp)
        .unwrap_or(STATS_CTR_DEFAULT)
}

/// First level with more than 300 clicks wins; else 0.003.
pub fn stats_cvr(record: &FeatureRecord) -> f64 {
    cascade_levels(record)
        .iter()
        .find(|c| c.click > STATS_CVR_MIN_CLICK)
        .map(|c| c.attr_install / c.click)
        .unwrap_or(STATS_CVR_DEFAULT)
}

pub struct Estimator {
    backend: Arc<dyn InferenceBackend>,
    spec: Arc<ModelSpec>,
    timeout: Duration,
}

impl Estimator {
    pub fn new(backend: Arc<dyn InferenceBackend>, spec: Arc<ModelSpec>, timeout: Duration) -> Self {
        Self {
            backend,
            spec,
            timeout,
        }
    }

    pub async fn ctr(
        &self,
        strategy: CtrStrategy,
        records: &[FeatureRecord],
    ) -> Result<Vec<f64>, EstimatorError> {
        match strategy {
            CtrStrategy::Statistics => Ok(records.iter().map(stats_ctr).collect()),
            CtrStrategy::Model => self.model_ctr(records).await,
        }
    }

    pub fn cvr(&self, records: &[FeatureRecord]) -> Vec<f64> {
        let _timer = StageTimer::start("cvr");
        records.iter().map(stats_cvr).collect()
    }

    /// One prediction per record. Any failure aborts CTR for the whole batch.
    pub async fn model_ctr(&self, records: &[FeatureRecord]) -> Result<Vec<f64>, EstimatorError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = {
            let _timer = StageTimer::start("tf_feature");
            let features: Vec<_> = records.iter().map(extract_model_features).collect();
            self.spec.build_batch(&features)?
        };

        let request = PredictRequest {
            model_name: self.spec.name.clone(),
            inputs,
        };

        let response = {
            let _timer = StageTimer::start("tf_predict");
            match tokio::time::timeout(self.timeout, self.backend.predict(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    metrics::record_error(ErrorSite::TfTransport);
                    error!(model = %self.spec.name, error = %e, "Inference call failed");
                    return Err(e.into());
                }
                Err(_) => {
                    let timeout_ms = self.timeout.as_millis() as u64;
                    metrics::record_error(ErrorSite::TfTimeout);
                    error!(model = %self.spec.name, timeout_ms, "Inference call timed out");
                    return Err(EstimatorError::Timeout(timeout_ms));
                }
            }
        };

        let output = &self.spec.output;
        let tensor = match response.outputs.get(output) {
            Some(tensor) => tensor,
            None => {
                metrics::record_error(ErrorSite::TfModelOutput);
                error!(model = %self.spec.name, output = %output, "Model output not found");
                return Err(EstimatorError::MissingOutput(output.clone()));
            }
        };

        let values = match tensor {
            Tensor::Float(values) => values,
            other => {
                metrics::record_error(ErrorSite::TfDataType);
                error!(output = %output, dtype = other.dtype(), "Model output is not float");
                return Err(EstimatorError::DataType {
                    name: output.clone(),
                    dtype: other.dtype(),
                });
            }
        };

        if values.len() != records.len() {
            metrics::record_error(ErrorSite::TfTensorSize);
            error!(
                expected = records.len(),
                actual = values.len(),
                "Model output size mismatch"
            );
            return Err(EstimatorError::TensorSize {
                expected: records.len(),
                actual: values.len(),
            });
        }

        debug!(records = records.len(), "Model CTR computed");
        Ok(values.iter().map(|v| *v as f64).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inference::PredictResponse;
    use ndarray::{array, Array2};
    use std::collections::HashMap;

    struct FixedBackend {
        outputs: HashMap<String, Tensor>,
        delay: Duration,
    }

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        async fn predict(
            &self,
            _request: PredictRequest,
        ) -> Result<PredictResponse, InferenceError> {
            tokio::time::sleep(self.delay).await;
            Ok(PredictResponse {
                outputs: self.outputs.clone(),
            })
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl InferenceBackend for FailingBackend {
        async fn predict(
            &self,
            _request: PredictRequest,
        ) -> Result<PredictResponse, InferenceError> {
            Err(InferenceError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    fn estimator_with(output: Tensor) -> Estimator {
        let mut outputs = HashMap::new();
        outputs.insert("predictions".to_string(), output);
        Estimator::new(
            Arc::new(FixedBackend {
                outputs,
                delay: Duration::ZERO,
            }),
            Arc::new(ModelSpec::builtin("dnn_model_t1", "predictions")),
            Duration::from_millis(50),
        )
    }

    fn records(n: usize) -> Vec<FeatureRecord> {
        vec![FeatureRecord::default(); n]
    }

    fn counts(imp: f64, click: f64, attr_install: f64) -> Option<CountFeatures> {
        Some(CountFeatures {
            imp,
            click,
            attr_install,
        })
    }

    #[test]
    fn test_strategy_selection() {
        let mut request = AdRequest::default();
        assert_eq!(CtrStrategy::for_request(&request), CtrStrategy::Model);

        request.exp_params.insert("stats_ctr".to_string(), 1);
        assert_eq!(CtrStrategy::for_request(&request), CtrStrategy::Statistics);

        request.exp_params.insert("stats_ctr".to_string(), 2);
        assert_eq!(CtrStrategy::for_request(&request), CtrStrategy::Model);
    }

    #[test]
    fn test_stats_ctr_cascade() {
        let mut record = FeatureRecord::default();
        assert_eq!(stats_ctr(&record), 0.05);

        record.ad_counter.ad_package_category.count_features_7d = counts(1000.0, 20.0, 0.0);
        assert!((stats_ctr(&record) - 0.02).abs() < 1e-12);

        record.ad_counter.ad_package_name.count_features_7d = counts(600.0, 30.0, 0.0);
        assert!((stats_ctr(&record) - 0.05).abs() < 1e-12);

        record.ad_counter.c_id.count_features_7d = counts(500.0, 100.0, 0.0);
        assert!((stats_ctr(&record) - 0.05).abs() < 1e-12, "500 is not enough");

        record.ad_counter.c_id.count_features_7d = counts(501.0, 167.0, 0.0);
        assert!((stats_ctr(&record) - 167.0 / 501.0).abs() < 1e-12);
    }

    #[test]
    fn test_stats_cvr_cascade() {
        let mut record = FeatureRecord::default();
        assert_eq!(stats_cvr(&record), 0.003);

        record.ad_counter.ad_package_name.count_features_7d = counts(0.0, 400.0, 8.0);
        assert!((stats_cvr(&record) - 0.02).abs() < 1e-12);

        record.ad_counter.c_id.count_features_7d = counts(0.0, 301.0, 3.01);
        assert!((stats_cvr(&record) - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_model_ctr_one_value_per_record() {
        let estimator = estimator_with(Tensor::Float(array![[0.1], [0.2], [0.3]]));
        let ctr = estimator
            .ctr(CtrStrategy::Model, &records(3))
            .await
            .unwrap();

        assert_eq!(ctr.len(), 3);
        assert!((ctr[1] - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_model_output_wrong_length() {
        let estimator = estimator_with(Tensor::Float(array![[0.1], [0.2]]));
        let result = estimator.model_ctr(&records(3)).await;

        assert!(matches!(
            result,
            Err(EstimatorError::TensorSize {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_model_output_wrong_type() {
        let estimator = estimator_with(Tensor::Int64(Array2::zeros((2, 1))));
        let before = metrics::error_count(ErrorSite::TfDataType);

        let result = estimator.model_ctr(&records(2)).await;
        assert!(matches!(result, Err(EstimatorError::DataType { .. })));
        assert!(metrics::error_count(ErrorSite::TfDataType) > before);
    }

    #[tokio::test]
    async fn test_model_output_missing() {
        let estimator = Estimator::new(
            Arc::new(FixedBackend {
                outputs: HashMap::new(),
                delay: Duration::ZERO,
            }),
            Arc::new(ModelSpec::builtin("dnn_model_t1", "predictions")),
            Duration::from_millis(50),
        );

        let result = estimator.model_ctr(&records(1)).await;
        assert!(matches!(result, Err(EstimatorError::MissingOutput(ref name)) if name == "predictions"));
    }

    #[tokio::test]
    async fn test_model_timeout_aborts() {
        let estimator = Estimator::new(
            Arc::new(FixedBackend {
                outputs: HashMap::new(),
                delay: Duration::from_millis(200),
            }),
            Arc::new(ModelSpec::builtin("dnn_model_t1", "predictions")),
            Duration::from_millis(10),
        );

        let result = estimator.model_ctr(&records(1)).await;
        assert!(matches!(result, Err(EstimatorError::Timeout(10))));
    }

    #[tokio::test]
    async fn test_transport_failure_aborts() {
        let estimator = Estimator::new(
            Arc::new(FailingBackend),
            Arc::new(ModelSpec::builtin("dnn_model_t1", "predictions")),
            Duration::from_millis(50),
        );
        let before = metrics::error_count(ErrorSite::TfTransport);

        let result = estimator.model_ctr(&records(1)).await;
        assert!(matches!(result, Err(EstimatorError::Transport(_))));
        assert!(metrics::error_count(ErrorSite::TfTransport) > before);
    }

    #[tokio::test]
    async fn test_statistics_strategy_skips_backend() {
        let estimator = Estimator::new(
            Arc::new(FailingBackend),
            Arc::new(ModelSpec::builtin("dnn_model_t1", "predictions")),
            Duration::from_millis(50),
        );

        let ctr = estimator
            .ctr(CtrStrategy::Statistics, &records(2))
            .await
            .unwrap();
        assert_eq!(ctr, vec![0.05, 0.05]);
        assert_eq!(estimator.cvr(&records(2)), vec![0.003, 0.003]);
    }
}
