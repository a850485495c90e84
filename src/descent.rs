//! Iterative minimisers driven by an [`Environment`] that supplies gradients.
//!
//! A minimiser is a lazy [`Descent`] sequence of parameter estimates. It ends
//! right after an estimate moves less than the configured precision (largest
//! per-coordinate change), or once the step budget is spent. Every call to
//! [`adagrad`] or [`gradient_descent`] starts over from the environment's
//! initial estimate.

use crate::engine::Value;
use crate::error::Result;
use crate::tensor::{Scalar, Tensor};
use log::{debug, info, trace};

pub const DEFAULT_PRECISION: Scalar = 1e-6;
pub const DEFAULT_MAX_STEPS: usize = 10_000;
const ADAGRAD_EPSILON: Scalar = 1e-8;

/// Starting point and stopping rule of a descent.
#[derive(Clone, Debug, PartialEq)]
pub struct DescentConfig {
    pub initial: Tensor,
    pub precision: Scalar,
    pub max_steps: usize,
}

impl DescentConfig {
    pub fn new(initial: impl Into<Tensor>) -> Self {
        Self {
            initial: initial.into(),
            precision: DEFAULT_PRECISION,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_precision(mut self, precision: Scalar) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// A function to minimise, seen through its gradient.
pub trait Environment {
    fn config(&self) -> &DescentConfig;

    fn gradient(&self, estimate: &Tensor) -> Result<Tensor>;
}

/// Gradient of `objective` at `estimate`: the estimate is wrapped in a
/// tracked leaf, the objective is evaluated and differentiated, and the
/// leaf's gradient is read back. Zero when the objective ignores it.
pub fn autograd_gradient<F>(objective: &F, estimate: &Tensor) -> Result<Tensor>
where
    F: Fn(&Value) -> Result<Value> + ?Sized,
{
    let parameter = Value::tracked(estimate.clone());
    let loss = objective(&parameter)?;
    if !loss.requires_grad() {
        return Ok(estimate.zeros_like());
    }
    loss.backward()?;

    Ok(parameter.grad().unwrap_or_else(|| estimate.zeros_like()))
}

/// Environment whose gradient comes from differentiating a scalar objective.
pub struct AutogradEnvironment<F> {
    config: DescentConfig,
    objective: F,
}

impl<F> AutogradEnvironment<F>
where
    F: Fn(&Value) -> Result<Value>,
{
    pub fn new(config: DescentConfig, objective: F) -> Self {
        Self { config, objective }
    }

    /// Objective value at `estimate`, without tracking gradients.
    pub fn objective(&self, estimate: &Tensor) -> Result<Tensor> {
        Ok((self.objective)(&Value::constant(estimate.clone()))?.data())
    }
}

impl<F> Environment for AutogradEnvironment<F>
where
    F: Fn(&Value) -> Result<Value>,
{
    fn config(&self) -> &DescentConfig {
        &self.config
    }

    fn gradient(&self, estimate: &Tensor) -> Result<Tensor> {
        autograd_gradient(&self.objective, estimate)
    }
}

/// How one estimate and its gradient produce the next estimate.
pub trait UpdateRule {
    fn step(&mut self, estimate: &Tensor, gradient: &Tensor) -> Result<Tensor>;
}

/// `x ← x − lr·g`
#[derive(Clone, Debug)]
pub struct FixedStep {
    learning_rate: Scalar,
}

impl UpdateRule for FixedStep {
    fn step(&mut self, estimate: &Tensor, gradient: &Tensor) -> Result<Tensor> {
        let lr = self.learning_rate;
        estimate.zip_map(gradient, "gradient descent", |x, g| x - lr * g)
    }
}

/// Per-coordinate adaptive steps: `x ← x − lr·g / (√G + ε)` where `G` sums
/// the squared gradients seen so far.
#[derive(Clone, Debug)]
pub struct AdagradStep {
    learning_rate: Scalar,
    sum_squares: Option<Tensor>,
}

impl UpdateRule for AdagradStep {
    fn step(&mut self, estimate: &Tensor, gradient: &Tensor) -> Result<Tensor> {
        let sum_squares = match &self.sum_squares {
            Some(acc) => acc.zip_map(gradient, "adagrad accumulator", |s, g| s + g * g)?,
            None => gradient.map(|g| g * g),
        };

        let lr = self.learning_rate;
        let scaled = gradient.zip_map(&sum_squares, "adagrad", |g, s| {
            lr * g / (s.sqrt() + ADAGRAD_EPSILON)
        })?;
        let next = estimate.zip_map(&scaled, "adagrad", |x, d| x - d)?;
        self.sum_squares = Some(sum_squares);

        Ok(next)
    }
}

/// Lazy sequence of estimates produced by an [`UpdateRule`].
///
/// A gradient error is yielded once and ends the sequence.
pub struct Descent<'a, E: ?Sized, R> {
    env: &'a E,
    rule: R,
    current: Tensor,
    steps: usize,
    done: bool,
}

impl<'a, E, R> Descent<'a, E, R>
where
    E: Environment + ?Sized,
    R: UpdateRule,
{
    pub fn new(env: &'a E, rule: R) -> Self {
        Self {
            env,
            rule,
            current: env.config().initial.clone(),
            steps: 0,
            done: false,
        }
    }

    /// Number of estimates produced so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Runs the sequence to its end and returns the last estimate, or the
    /// initial one if no step was taken.
    pub fn final_estimate(mut self) -> Result<Tensor> {
        let mut last = self.current.clone();
        for estimate in &mut self {
            last = estimate?;
        }
        Ok(last)
    }
}

impl<'a, E, R> Iterator for Descent<'a, E, R>
where
    E: Environment + ?Sized,
    R: UpdateRule,
{
    type Item = Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let (precision, max_steps) = {
            let config = self.env.config();
            (config.precision, config.max_steps)
        };
        if self.steps >= max_steps {
            self.done = true;
            info!("descent stopped after {} steps without converging", self.steps);
            return None;
        }

        let step = self
            .env
            .gradient(&self.current)
            .and_then(|gradient| self.rule.step(&self.current, &gradient))
            .and_then(|next| Ok((next.max_abs_diff(&self.current)?, next)));
        let (change, next) = match step {
            Ok(step) => step,
            Err(err) => {
                self.done = true;
                debug!("descent aborted at step {}: {}", self.steps + 1, err);
                return Some(Err(err));
            }
        };

        self.steps += 1;
        trace!("descent step {}: change {:e}", self.steps, change);
        if change < precision {
            self.done = true;
            info!("descent converged after {} steps", self.steps);
        }

        self.current = next.clone();
        Some(Ok(next))
    }
}

/// Adagrad minimiser over `env`.
pub fn adagrad<E>(learning_rate: Scalar, env: &E) -> Descent<'_, E, AdagradStep>
where
    E: Environment + ?Sized,
{
    Descent::new(
        env,
        AdagradStep {
            learning_rate,
            sum_squares: None,
        },
    )
}

/// Fixed-step gradient descent over `env`.
pub fn gradient_descent<E>(learning_rate: Scalar, env: &E) -> Descent<'_, E, FixedStep>
where
    E: Environment + ?Sized,
{
    Descent::new(env, FixedStep { learning_rate })
}
