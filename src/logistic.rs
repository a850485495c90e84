//! Binary logistic regression fitted by gradient descent.

use crate::data::Dataset;
use crate::descent::{autograd_gradient, DescentConfig, Environment};
use crate::engine::Value;
use crate::error::{AutogradError, Result};
use crate::ops::{self, logistic};
use crate::tensor::{Scalar, Tensor};
use itertools::izip;
use log::debug;

/// Fitted weights of a logistic model, one per evidence column.
#[derive(Clone, Debug, PartialEq)]
pub struct LogisticRegressionModel {
    weights: Tensor,
}

impl LogisticRegressionModel {
    pub fn new(weights: impl Into<Tensor>) -> Self {
        Self {
            weights: weights.into(),
        }
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// `sigmoid(X·w)`, the probability of label `1` for each row.
    pub fn probabilities(&self, evidence: &Tensor) -> Result<Tensor> {
        Ok(evidence.matvec(&self.weights)?.map(logistic))
    }

    pub fn predict(&self, evidence: &Tensor) -> Result<Tensor> {
        Ok(self
            .probabilities(evidence)?
            .map(|p| if p >= 0.5 { 1. } else { 0. }))
    }

    /// Fraction of rows whose predicted label equals the response.
    pub fn evaluate(&self, evidence: &Tensor, response: &Tensor) -> Result<Scalar> {
        let predictions = self.predict(evidence)?;
        if predictions.shape() != response.shape() {
            return Err(AutogradError::ShapeMismatch {
                expected: predictions.shape().to_vec(),
                actual: response.shape().to_vec(),
                operation: "evaluate".to_string(),
            });
        }
        if predictions.is_empty() {
            return Ok(0.);
        }

        let hits = izip!(predictions.data(), response.data())
            .filter(|(p, y)| p == y)
            .count();
        let accuracy = hits as Scalar / predictions.len() as Scalar;
        debug!("accuracy {} over {} rows", accuracy, predictions.len());

        Ok(accuracy)
    }
}

/// Mean logistic loss of a dataset, `mean(softplus(X·w) − y⊙(X·w))`, plus an
/// optional `λ/2·‖w‖²` penalty.
pub struct LogisticEnvironment {
    config: DescentConfig,
    evidence: Value,
    response: Value,
    l2: Scalar,
}

impl LogisticEnvironment {
    pub fn new(config: DescentConfig, dataset: &Dataset) -> Result<Self> {
        if config.initial.shape() != [dataset.features()] {
            return Err(AutogradError::ShapeMismatch {
                expected: vec![dataset.features()],
                actual: config.initial.shape().to_vec(),
                operation: "logistic initial weights".to_string(),
            });
        }

        Ok(Self {
            config,
            evidence: Value::constant(dataset.evidence().clone()),
            response: Value::constant(dataset.response().clone()),
            l2: 0.,
        })
    }

    pub fn with_l2(mut self, lambda: Scalar) -> Self {
        self.l2 = lambda;
        self
    }

    pub fn objective(&self, weights: &Value) -> Result<Value> {
        let logits = ops::matvec(&self.evidence, weights)?;
        let fitted = ops::mul(&self.response, &logits)?;
        let loss = ops::sub(&logits.softplus(), &fitted)?.mean();
        if self.l2 == 0. {
            return Ok(loss);
        }

        let penalty = ops::mul(&Value::constant(self.l2 / 2.), &weights.pow(2.).sum())?;
        ops::add(&loss, &penalty)
    }

    /// Loss at `weights`, evaluated without tracking gradients.
    pub fn loss(&self, weights: &Tensor) -> Result<Scalar> {
        let loss = self.objective(&Value::constant(weights.clone()))?;
        Ok(loss.item().unwrap_or(Scalar::NAN))
    }
}

impl Environment for LogisticEnvironment {
    fn config(&self) -> &DescentConfig {
        &self.config
    }

    fn gradient(&self, estimate: &Tensor) -> Result<Tensor> {
        autograd_gradient(&|weights: &Value| self.objective(weights), estimate)
    }
}
