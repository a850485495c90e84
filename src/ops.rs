//! Differentiable operations on [`Value`]s.
//!
//! Every operation computes its output payload eagerly and records its local
//! derivative rule when at least one input tracks gradients. Binary
//! elementwise operations accept equal shapes or a scalar-like operand, which
//! is broadcast; its gradient is the sum of the broadcast contributions.
//!
//! The functions here return [`Result`] on shape errors. The operator
//! overloads (`+`, `-`, `*`, `/`, unary `-`) panic with the same error
//! instead, like array libraries do for mismatched operands.

use crate::engine::{BackwardFn, Value};
use crate::error::Result;
use crate::tensor::{Scalar, Tensor};

fn binary(
    a: &Value,
    b: &Value,
    name: &'static str,
    f: impl Fn(Scalar, Scalar) -> Scalar,
    backward: BackwardFn,
) -> Result<Value> {
    let data = a.payload().zip_map(&b.payload(), name, f)?;
    Ok(Value::from_op(data, name, vec![a.clone(), b.clone()], backward))
}

fn unary(a: &Value, name: &'static str, f: impl Fn(Scalar) -> Scalar, backward: BackwardFn) -> Value {
    let data = a.payload().map(f);
    Value::from_op(data, name, vec![a.clone()], backward)
}

fn zip(x: &Tensor, y: &Tensor, f: impl Fn(Scalar, Scalar) -> Scalar) -> Result<Tensor> {
    x.zip_map(y, "backward", f)
}

pub fn add(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, "add", |x, y| x + y, add_backward)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, "sub", |x, y| x - y, sub_backward)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, "mul", |x, y| x * y, mul_backward)
}

/// Division by zero yields non-finite values, in the output and in the
/// gradients alike.
pub fn div(a: &Value, b: &Value) -> Result<Value> {
    binary(a, b, "div", |x, y| x / y, div_backward)
}

/// `a` raised to a value exponent. Both operands are differentiable.
pub fn powv(a: &Value, exp: &Value) -> Result<Value> {
    binary(a, exp, "pow", Scalar::powf, pow_backward)
}

/// `a` raised to a constant exponent. A fractional exponent on a negative
/// base gives NaN.
pub fn pow(a: &Value, exp: Scalar) -> Value {
    let data = a.payload().map(|x| x.powf(exp));
    Value::from_op(data, "pow", vec![a.clone(), Value::constant(exp)], powf_backward)
}

pub fn neg(a: &Value) -> Value {
    unary(a, "neg", |x| -x, neg_backward)
}

pub fn sin(a: &Value) -> Value {
    unary(a, "sin", Scalar::sin, sin_backward)
}

pub fn cos(a: &Value) -> Value {
    unary(a, "cos", Scalar::cos, cos_backward)
}

pub fn exp(a: &Value) -> Value {
    unary(a, "exp", Scalar::exp, exp_backward)
}

pub fn ln(a: &Value) -> Value {
    unary(a, "ln", Scalar::ln, ln_backward)
}

pub fn sigmoid(a: &Value) -> Value {
    unary(a, "sigmoid", logistic, sigmoid_backward)
}

pub fn relu(a: &Value) -> Value {
    unary(a, "relu", |x| x.max(0.), relu_backward)
}

/// `ln(1 + e^a)`, evaluated without overflowing for large `a`.
pub fn softplus(a: &Value) -> Value {
    unary(a, "softplus", |x| x.max(0.) + (-x.abs()).exp().ln_1p(), softplus_backward)
}

/// Product of a `[m, n]` matrix with a `[n]` vector.
pub fn matvec(a: &Value, w: &Value) -> Result<Value> {
    let data = a.payload().matvec(&w.payload())?;
    Ok(Value::from_op(data, "matvec", vec![a.clone(), w.clone()], matvec_backward))
}

pub fn transpose(a: &Value) -> Value {
    let data = a.payload().transpose();
    Value::from_op(data, "transpose", vec![a.clone()], transpose_backward)
}

pub fn sum(a: &Value) -> Value {
    let data = Tensor::scalar(a.payload().sum());
    Value::from_op(data, "sum", vec![a.clone()], sum_backward)
}

/// Mean of all elements. Empty input gives NaN.
pub fn mean(a: &Value) -> Value {
    let data = Tensor::scalar(a.payload().mean());
    Value::from_op(data, "mean", vec![a.clone()], mean_backward)
}

/// Standard logistic function.
pub fn logistic(x: Scalar) -> Scalar {
    1. / (1. + (-x).exp())
}

fn add_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![
        out_grad.sum_to(args[0].payload().shape()),
        out_grad.sum_to(args[1].payload().shape()),
    ])
}

fn sub_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![
        out_grad.sum_to(args[0].payload().shape()),
        out_grad.map(|g| -g).sum_to(args[1].payload().shape()),
    ])
}

fn mul_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    let (a, b) = (args[0].payload(), args[1].payload());
    Ok(vec![
        zip(out_grad, &b, |g, b| g * b)?.sum_to(a.shape()),
        zip(out_grad, &a, |g, a| g * a)?.sum_to(b.shape()),
    ])
}

fn div_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    let (a, b) = (args[0].payload(), args[1].payload());
    let ga = zip(out_grad, &b, |g, b| g / b)?;
    let gb = zip(&zip(out_grad, &a, |g, a| g * a)?, &b, |ga, b| -ga / (b * b))?;
    Ok(vec![ga.sum_to(a.shape()), gb.sum_to(b.shape())])
}

fn pow_backward(args: &[Value], out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    let (a, n) = (args[0].payload(), args[1].payload());
    let slope = zip(&a, &n, |a, n| n * a.powf(n - 1.))?;
    let ga = zip(out_grad, &slope, |g, s| g * s)?;
    let log_base = zip(out_data, &a, |out, a| out * a.ln())?;
    let gn = zip(out_grad, &log_base, |g, l| g * l)?;
    Ok(vec![ga.sum_to(a.shape()), gn.sum_to(n.shape())])
}

/// Constant exponent: only the base is differentiated.
fn powf_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    let (a, n) = (args[0].payload(), args[1].payload());
    let slope = zip(&a, &n, |a, n| n * a.powf(n - 1.))?;
    let ga = zip(out_grad, &slope, |g, s| g * s)?;
    Ok(vec![ga.sum_to(a.shape()), n.zeros_like()])
}

fn neg_backward(_args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![out_grad.map(|g| -g)])
}

fn sin_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, &args[0].payload(), |g, a| g * a.cos())?])
}

fn cos_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, &args[0].payload(), |g, a| -g * a.sin())?])
}

fn exp_backward(_args: &[Value], out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, out_data, |g, out| g * out)?])
}

fn ln_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, &args[0].payload(), |g, a| g / a)?])
}

fn sigmoid_backward(_args: &[Value], out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, out_data, |g, s| g * s * (1. - s))?])
}

fn relu_backward(_args: &[Value], out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, out_data, |g, out| if out > 0. { g } else { 0. })?])
}

fn softplus_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![zip(out_grad, &args[0].payload(), |g, a| g * logistic(a))?])
}

fn matvec_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    let (a, w) = (args[0].payload(), args[1].payload());
    Ok(vec![out_grad.outer(&w)?, a.transpose().matvec(out_grad)?])
}

fn transpose_backward(_args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![out_grad.transpose()])
}

fn sum_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    Ok(vec![Tensor::full(args[0].payload().shape(), out_grad.sum())])
}

fn mean_backward(args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
    let a = args[0].payload();
    Ok(vec![Tensor::full(a.shape(), out_grad.sum() / a.len() as Scalar)])
}

impl Value {
    pub fn pow(&self, exp: Scalar) -> Value {
        pow(self, exp)
    }

    pub fn powv(&self, exp: &Value) -> Result<Value> {
        powv(self, exp)
    }

    pub fn sin(&self) -> Value {
        sin(self)
    }

    pub fn cos(&self) -> Value {
        cos(self)
    }

    pub fn exp(&self) -> Value {
        exp(self)
    }

    pub fn ln(&self) -> Value {
        ln(self)
    }

    pub fn sigmoid(&self) -> Value {
        sigmoid(self)
    }

    pub fn relu(&self) -> Value {
        relu(self)
    }

    pub fn softplus(&self) -> Value {
        softplus(self)
    }

    pub fn matvec(&self, w: &Value) -> Result<Value> {
        matvec(self, w)
    }

    pub fn t(&self) -> Value {
        transpose(self)
    }

    pub fn sum(&self) -> Value {
        sum(self)
    }

    pub fn mean(&self) -> Value {
        mean(self)
    }
}

fn expect_shapes(result: Result<Value>) -> Value {
    result.unwrap_or_else(|err| panic!("{err}"))
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:path) => {
        impl std::ops::$trait<&Value> for &Value {
            type Output = Value;

            fn $method(self, rhs: &Value) -> Self::Output {
                expect_shapes($op(self, rhs))
            }
        }

        impl std::ops::$trait<Value> for Value {
            type Output = Value;

            fn $method(self, rhs: Value) -> Self::Output {
                expect_shapes($op(&self, &rhs))
            }
        }

        impl std::ops::$trait<&Value> for Value {
            type Output = Value;

            fn $method(self, rhs: &Value) -> Self::Output {
                expect_shapes($op(&self, rhs))
            }
        }

        impl std::ops::$trait<Value> for &Value {
            type Output = Value;

            fn $method(self, rhs: Value) -> Self::Output {
                expect_shapes($op(self, &rhs))
            }
        }

        impl std::ops::$trait<Scalar> for &Value {
            type Output = Value;

            fn $method(self, rhs: Scalar) -> Self::Output {
                expect_shapes($op(self, &Value::constant(rhs)))
            }
        }

        impl std::ops::$trait<Scalar> for Value {
            type Output = Value;

            fn $method(self, rhs: Scalar) -> Self::Output {
                expect_shapes($op(&self, &Value::constant(rhs)))
            }
        }

        impl std::ops::$trait<&Value> for Scalar {
            type Output = Value;

            fn $method(self, rhs: &Value) -> Self::Output {
                expect_shapes($op(&Value::constant(self), rhs))
            }
        }

        impl std::ops::$trait<Value> for Scalar {
            type Output = Value;

            fn $method(self, rhs: Value) -> Self::Output {
                expect_shapes($op(&Value::constant(self), &rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, add);
impl_binary_op!(Sub, sub, sub);
impl_binary_op!(Mul, mul, mul);
impl_binary_op!(Div, div, div);

impl std::ops::Neg for &Value {
    type Output = Value;

    fn neg(self) -> Self::Output {
        neg(self)
    }
}

impl std::ops::Neg for Value {
    type Output = Value;

    fn neg(self) -> Self::Output {
        neg(&self)
    }
}
