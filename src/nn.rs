use crate::data::Dataset;
use crate::engine::Value;
use crate::error::Result;
use crate::ops;
use crate::tensor::{Scalar, Tensor};
use log::trace;
use rand::prelude::*;
use rand::rngs::StdRng;

pub trait Module {
    fn zero_grad(&self) {
        self.parameters().iter().for_each(|v| v.reset_grad())
    }

    fn parameters(&self) -> Vec<Value>;

    /// Moves every parameter that received a gradient by `-lr · grad`.
    fn sgd_step(&self, lr: Scalar) -> Result<()> {
        for p in self.parameters() {
            if let Some(grad) = p.grad() {
                let next = p.payload().zip_map(&grad, "sgd step", |x, g| x - lr * g)?;
                p.set_data(next)?;
            }
        }

        Ok(())
    }
}

/// Fully connected layer `W·x + b`, optionally followed by a ReLU.
pub struct Linear {
    weight: Value,
    bias: Value,
    nonlin: bool,
}

impl Linear {
    pub fn new(rng: &mut StdRng, nin: usize, nout: usize, nonlin: bool) -> Self {
        let weight = Tensor::zeros(&[nout, nin]).map(|_| rng.gen_range(-1.0..1.0));
        Self {
            weight: Value::tracked(weight),
            bias: Value::tracked(Tensor::zeros(&[nout])),
            nonlin,
        }
    }

    pub fn weight(&self) -> &Value {
        &self.weight
    }

    pub fn bias(&self) -> &Value {
        &self.bias
    }

    pub fn run(&self, x: &Value) -> Result<Value> {
        let sum = ops::add(&ops::matvec(&self.weight, x)?, &self.bias)?;

        Ok(if self.nonlin { sum.relu() } else { sum })
    }
}

impl Module for Linear {
    fn parameters(&self) -> Vec<Value> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

impl std::fmt::Display for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.weight.shape();
        f.write_fmt(format_args!(
            "{}Linear({} -> {})",
            if self.nonlin { "ReLU" } else { "" },
            shape[1],
            shape[0]
        ))
    }
}

/// Binary classifier: `Linear → relu → Linear → sigmoid`.
pub struct TwoLayerNetwork {
    hidden: Linear,
    output: Linear,
}

impl TwoLayerNetwork {
    pub fn new(rng: &mut StdRng, nin: usize, nhidden: usize) -> Self {
        Self {
            hidden: Linear::new(rng, nin, nhidden, true),
            output: Linear::new(rng, nhidden, 1, false),
        }
    }

    /// Pre-activation output for one observation, as a scalar.
    pub fn logit(&self, x: &Value) -> Result<Value> {
        Ok(self.output.run(&self.hidden.run(x)?)?.sum())
    }

    /// Probability of label `1` for one observation.
    pub fn forward(&self, x: &Value) -> Result<Value> {
        Ok(self.logit(x)?.sigmoid())
    }

    /// Mean binary cross-entropy over the rows of `dataset`, written as
    /// `softplus(z) − y·z` on the logits so it stays finite for confident
    /// predictions. An empty dataset has zero loss.
    pub fn loss(&self, dataset: &Dataset) -> Result<Value> {
        if dataset.is_empty() {
            return Ok(Value::constant(0.));
        }

        let mut terms = Vec::with_capacity(dataset.len());
        for (i, &y) in dataset.response().data().iter().enumerate() {
            let x = Value::constant(dataset.evidence().row(i)?);
            let z = self.logit(&x)?;
            terms.push(ops::sub(&z.softplus(), &ops::mul(&Value::constant(y), &z)?)?);
        }
        let total = pairwise_sum(terms)?;
        let loss = ops::div(&total, &Value::constant(dataset.len() as Scalar))?;
        trace!("network loss {:?} over {} rows", loss.item(), dataset.len());

        Ok(loss)
    }

    /// Thresholded predictions, one per row.
    pub fn predict(&self, evidence: &Tensor) -> Result<Tensor> {
        let rows = evidence.shape().first().copied().unwrap_or(0);
        let mut labels = Vec::with_capacity(rows);
        for i in 0..rows {
            let p = self.forward(&Value::constant(evidence.row(i)?))?;
            labels.push(if p.item().unwrap_or(0.) >= 0.5 { 1. } else { 0. });
        }

        Ok(Tensor::vector(labels))
    }

    /// Fraction of correctly classified rows; zero for an empty dataset.
    pub fn evaluate(&self, dataset: &Dataset) -> Result<Scalar> {
        if dataset.is_empty() {
            return Ok(0.);
        }
        let predictions = self.predict(dataset.evidence())?;
        let hits = predictions
            .data()
            .iter()
            .zip(dataset.response().data())
            .filter(|(p, y)| p == y)
            .count();

        Ok(hits as Scalar / dataset.len() as Scalar)
    }
}

/// Adds `terms` in a balanced tree, keeping the graph depth logarithmic in
/// the number of terms.
fn pairwise_sum(mut terms: Vec<Value>) -> Result<Value> {
    while terms.len() > 1 {
        terms = terms
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => ops::add(a, b),
                _ => Ok(pair[0].clone()),
            })
            .collect::<Result<_>>()?;
    }

    Ok(terms.pop().unwrap_or_else(|| Value::constant(0.)))
}

impl Module for TwoLayerNetwork {
    fn parameters(&self) -> Vec<Value> {
        [&self.hidden, &self.output]
            .iter()
            .flat_map(|l| l.parameters())
            .collect()
    }
}

impl std::fmt::Display for TwoLayerNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "TwoLayerNetwork of [{}, {}, Sigmoid]",
            self.hidden, self.output
        ))
    }
}
