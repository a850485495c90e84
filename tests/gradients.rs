use float_eq::assert_float_eq;
use gradwalk::engine::viz;
use gradwalk::{AutogradError, Tensor, Value};

fn grad_of(v: &Value) -> Vec<f64> {
    v.grad().expect("gradient").into_data()
}

#[test]
fn karpathy_test_sanity_check() {
    let x = Value::tracked(-4.0);
    let z = 2. * &x + 2. + &x;
    let q = z.relu() + &z * &x;
    let h = (&z * &z).relu();
    let y = h + &q + &q * &x;
    y.backward().unwrap();

    assert_float_eq!(y.item().unwrap(), -20.0, abs <= 1e-10);
    assert_float_eq!(x.grad().unwrap().item().unwrap(), 46.0, abs <= 1e-10);
}

#[test]
fn karpathy_test_more_ops() {
    let a = Value::tracked(-4.0);
    let b = Value::tracked(2.0);
    let mut c = &a + &b;
    let mut d = &a * &b + b.pow(3.);
    c = &c + &c + 1.;
    c = &c + 1. + &c + (-&a);
    d = &d + &d * 2. + (&b + &a).relu();
    d = &d + 3. * &d + (&b - &a).relu();
    let e = &c - &d;
    let f = e.pow(2.);
    let mut g = &f / 2.0;
    g = g + 10.0 / &f;
    g.backward().unwrap();

    let tol = 1e-6;
    assert_float_eq!(g.item().unwrap(), 24.70408163265306, abs <= tol);
    assert_float_eq!(a.grad().unwrap().item().unwrap(), 138.83381924198252, abs <= tol);
    assert_float_eq!(b.grad().unwrap().item().unwrap(), 645.5772594752186, abs <= tol);
}

#[test]
fn square_of_scalar() {
    let a = Value::tracked(3.0);
    a.pow(2.).backward().unwrap();

    assert_float_eq!(a.grad().unwrap().item().unwrap(), 6.0, abs <= 1e-10);
}

#[test]
fn vector_reductions() {
    let x = Value::tracked(vec![3., 4.]);
    x.pow(2.).sum().backward().unwrap();
    assert_float_eq!(grad_of(&x), vec![6., 8.], abs_all <= 1e-10);

    let x = Value::tracked(vec![3., 4.]);
    x.pow(2.).mean().backward().unwrap();
    assert_float_eq!(grad_of(&x), vec![3., 4.], abs_all <= 1e-10);
}

#[test]
fn matrix_chain_rule() {
    let x = Value::tracked(Tensor::from_rows(&[vec![1., 2.], vec![3., 4.]]).unwrap());
    let y = &x + 2.;
    let z = 3. * y.pow(2.);
    let out = z.sum();
    out.backward().unwrap();

    let grad = x.grad().unwrap();
    assert_eq!(grad.shape(), &[2, 2]);
    assert_float_eq!(grad.into_data(), vec![18., 24., 30., 36.], abs_all <= 1e-10);
}

#[test]
fn diamond_accumulates_both_branches() {
    let x = Value::tracked(vec![1.5, -2.]);
    let z = &x * &x + &x * &x;
    z.sum().backward().unwrap();

    assert_float_eq!(grad_of(&x), vec![6., -8.], abs_all <= 1e-10);
}

#[test]
fn detach_blocks_gradient() {
    let x = Value::tracked(2.0);
    let frozen = x.detach();
    let y = &x * 3. + &frozen * &frozen;
    y.backward().unwrap();

    assert_float_eq!(x.grad().unwrap().item().unwrap(), 3.0, abs <= 1e-10);
    assert!(frozen.grad().is_none());
    assert!(!frozen.requires_grad());
}

#[test]
fn clone_is_pass_through() {
    let x = Value::tracked(vec![1., 2.]);
    let copy = x.clone_node();
    copy.pow(3.).sum().backward().unwrap();

    assert_eq!(copy.op_name(), Some("clone"));
    assert_eq!(grad_of(&copy), grad_of(&x));
    assert_float_eq!(grad_of(&x), vec![3., 12.], abs_all <= 1e-10);
}

#[test]
fn untracked_leaf_has_no_gradient() {
    let x = Value::tracked(1.0);
    let c = Value::constant(5.0);
    (&x * &c).backward().unwrap();

    assert!(c.grad().is_none());
    assert_eq!(c.backward(), Err(AutogradError::UntrackedRoot));
}

#[test]
fn second_pass_needs_retained_graph() {
    let x = Value::tracked(2.0);
    let y = x.pow(2.);
    y.backward_with(None, true).unwrap();
    y.backward().unwrap();
    assert_float_eq!(x.grad().unwrap().item().unwrap(), 8.0, abs <= 1e-10);

    assert!(matches!(
        y.backward(),
        Err(AutogradError::InvalidBackwardTarget(_))
    ));
}

#[test]
fn dot_output_lists_every_value() {
    let a = Value::tracked(1.0);
    let b = Value::tracked(2.0);
    let c = (&a * &b).sin();
    c.backward().unwrap();

    let dot = viz::render_dot(&c);
    assert!(dot.starts_with("strict digraph {"));
    assert!(dot.contains("[label=\"mul\"]"));
    assert!(dot.contains("[label=\"sin\"]"));
    assert_eq!(dot.matches("shape=record").count(), 4);
}
