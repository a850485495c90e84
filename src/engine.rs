use crate::error::{AutogradError, Result};
use crate::tensor::{Scalar, Tensor};
use itertools::Itertools;
use log::debug;
use std::cell::{Cell, Ref, RefCell};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub type ValueId = usize;

/// Local derivative rule of an operation.
///
/// Receives the operation inputs, the output payload and the upstream
/// gradient (shaped like the output), and returns one gradient contribution
/// per input, shaped like that input.
pub type BackwardFn = fn(&[Value], &Tensor, &Tensor) -> Result<Vec<Tensor>>;

/// Record of one applied operation, owned by the value it produced.
#[derive(Debug)]
pub struct OpRecord {
    name: &'static str,
    inputs: Vec<Value>,
    backward: BackwardFn,
    released: Cell<bool>,
}

#[derive(Debug)]
struct Node {
    id: ValueId,
    data: Rc<RefCell<Tensor>>,
    grad: RefCell<Option<Tensor>>,
    requires_grad: bool,
    op: Option<OpRecord>,
}

impl Drop for Node {
    // Unlinks the graph iteratively. Inputs only this node still owns are
    // taken apart here instead of in their own nested drop.
    fn drop(&mut self) {
        let Some(op) = self.op.as_mut() else {
            return;
        };
        let mut orphans = std::mem::take(&mut op.inputs);
        while let Some(Value(input)) = orphans.pop() {
            if let Ok(mut node) = Rc::try_unwrap(input) {
                if let Some(op) = node.op.as_mut() {
                    orphans.append(&mut op.inputs);
                }
            }
        }
    }
}

/// Tensor value backed by an autograd engine.
///
/// Cloning the handle aliases the same node. Use [`Value::clone_node`] for a
/// new node wired into the graph as a pass-through of this one.
#[derive(Clone, Debug)]
pub struct Value(Rc<Node>);

impl Value {
    /// A leaf value. Only tracked leaves receive gradients.
    pub fn leaf(payload: impl Into<Tensor>, requires_grad: bool) -> Self {
        Self::from_parts(Rc::new(RefCell::new(payload.into())), requires_grad, None)
    }

    pub fn tracked(payload: impl Into<Tensor>) -> Self {
        Self::leaf(payload, true)
    }

    pub fn constant(payload: impl Into<Tensor>) -> Self {
        Self::leaf(payload, false)
    }

    /// Output of an operation applied to `inputs`.
    ///
    /// The output tracks gradients when any input does, and the operation
    /// record is only kept in that case.
    pub fn from_op(
        data: Tensor,
        name: &'static str,
        inputs: Vec<Value>,
        backward: BackwardFn,
    ) -> Self {
        let requires_grad = inputs.iter().any(Value::requires_grad);
        let op = requires_grad.then(|| OpRecord {
            name,
            inputs,
            backward,
            released: Cell::new(false),
        });
        Self::from_parts(Rc::new(RefCell::new(data)), requires_grad, op)
    }

    fn from_parts(data: Rc<RefCell<Tensor>>, requires_grad: bool, op: Option<OpRecord>) -> Self {
        Self(Rc::new(Node {
            id: super::get_id(),
            data,
            grad: RefCell::new(None),
            requires_grad,
            op,
        }))
    }

    pub fn id(&self) -> ValueId {
        self.0.id
    }

    pub fn data(&self) -> Tensor {
        self.0.data.borrow().clone()
    }

    pub(crate) fn payload(&self) -> Ref<'_, Tensor> {
        self.0.data.borrow()
    }

    pub fn item(&self) -> Option<Scalar> {
        self.payload().item()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.payload().shape().to_vec()
    }

    /// Replaces the payload in place, keeping the node and its graph links.
    pub fn set_data(&self, payload: Tensor) -> Result<()> {
        let mut data = self.0.data.borrow_mut();
        if data.shape() != payload.shape() {
            return Err(AutogradError::ShapeMismatch {
                expected: data.shape().to_vec(),
                actual: payload.shape().to_vec(),
                operation: "set_data".to_string(),
            });
        }
        *data = payload;
        Ok(())
    }

    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad
    }

    pub fn is_leaf(&self) -> bool {
        self.0.op.is_none()
    }

    pub fn op_name(&self) -> Option<&'static str> {
        self.0.op.as_ref().map(|op| op.name)
    }

    pub fn inputs(&self) -> &[Value] {
        self.0.op.as_ref().map_or(&[][..], |op| op.inputs.as_slice())
    }

    /// Accumulated gradient. `None` until a backward pass reaches this value.
    pub fn grad(&self) -> Option<Tensor> {
        self.0.grad.borrow().clone()
    }

    pub fn reset_grad(&self) {
        *self.0.grad.borrow_mut() = None
    }

    /// A new untracked leaf sharing this value's payload.
    pub fn detach(&self) -> Value {
        Self::from_parts(Rc::clone(&self.0.data), false, None)
    }

    /// A copy of this value recorded as a pass-through operation: gradient
    /// reaching the copy is forwarded unchanged to this value.
    pub fn clone_node(&self) -> Value {
        Self::from_op(self.data(), "clone", vec![self.clone()], Self::clone_backward)
    }

    /// Backpropagates from a scalar-like value with a unit seed.
    pub fn backward(&self) -> Result<()> {
        self.backward_with(None, false)
    }

    /// Backpropagates from this value.
    ///
    /// Gradients accumulate into every tracked value reached, on top of what
    /// earlier passes left there; call [`Value::reset_grad`] (or
    /// `Module::zero_grad`) between independent passes. Unless
    /// `retain_graph` is set, the traversed operation records are released
    /// and a later pass through them fails with
    /// [`AutogradError::InvalidBackwardTarget`].
    ///
    /// Slots are written only once every local rule has succeeded, so a
    /// failing pass leaves gradients and the graph as they were.
    pub fn backward_with(&self, seed: Option<Tensor>, retain_graph: bool) -> Result<()> {
        if !self.requires_grad() {
            return Err(AutogradError::UntrackedRoot);
        }

        let shape = self.shape();
        let seed = match seed {
            Some(seed) if seed.shape() == shape.as_slice() => seed,
            Some(seed) => {
                return Err(AutogradError::ShapeMismatch {
                    expected: shape,
                    actual: seed.shape().to_vec(),
                    operation: "backward seed".to_string(),
                })
            }
            None if self.payload().is_scalar_like() => Tensor::ones(&shape),
            None => {
                return Err(AutogradError::ShapeMismatch {
                    expected: vec![],
                    actual: shape,
                    operation: "implicit backward seed".to_string(),
                })
            }
        };

        let topo = Self::build_topology(self.clone());
        if let Some(stale) = topo.iter().find(|node| node.is_released()) {
            return Err(AutogradError::InvalidBackwardTarget(format!(
                "the graph through '{}' (value {}) was released by an earlier backward pass",
                stale.op_name().unwrap_or_default(),
                stale.id()
            )));
        }
        debug!(
            "backward from value {} through {} tracked values",
            self.id(),
            topo.len()
        );

        let mut pending = HashMap::<ValueId, Tensor>::new();
        let mut settled = Vec::with_capacity(topo.len());
        pending.insert(self.id(), seed);
        for node in topo.iter() {
            let Some(grad) = pending.remove(&node.id()) else {
                continue;
            };

            if let Some(op) = &node.0.op {
                let contributions = (op.backward)(&op.inputs, &node.payload(), &grad)?;
                for (input, delta) in op.inputs.iter().zip(contributions) {
                    if !input.requires_grad() {
                        continue;
                    }
                    match pending.entry(input.id()) {
                        Entry::Occupied(mut acc) => *acc.get_mut() += &delta,
                        Entry::Vacant(slot) => {
                            slot.insert(delta);
                        }
                    }
                }
            }
            settled.push((node, grad));
        }

        for (node, grad) in settled {
            node.update_grad(&grad);
        }
        if !retain_graph {
            topo.iter()
                .filter_map(|node| node.0.op.as_ref())
                .for_each(|op| op.released.set(true));
        }

        Ok(())
    }

    fn is_released(&self) -> bool {
        self.0.op.as_ref().is_some_and(|op| op.released.get())
    }

    /// Tracked values reachable from `root`, every value ahead of its inputs.
    ///
    /// Postorder DFS over an explicit stack; a frame is revisited once its
    /// inputs have been pushed, so deep chains do not grow the call stack.
    fn build_topology(root: Value) -> Vec<Value> {
        let mut topo = vec![];
        let mut visited = HashSet::<ValueId>::new();
        let mut stack = vec![(root, false)];

        while let Some((node, inputs_pushed)) = stack.pop() {
            if inputs_pushed {
                topo.push(node);
                continue;
            }
            if !node.requires_grad() || !visited.insert(node.id()) {
                continue;
            }
            let inputs = node
                .inputs()
                .iter()
                .rev()
                .filter(|input| input.requires_grad() && !visited.contains(&input.id()))
                .map(|input| (input.clone(), false))
                .collect_vec();
            stack.push((node, true));
            stack.extend(inputs);
        }
        topo.reverse();

        topo
    }

    fn clone_backward(_args: &[Value], _out_data: &Tensor, out_grad: &Tensor) -> Result<Vec<Tensor>> {
        Ok(vec![out_grad.clone()])
    }

    fn update_grad(&self, delta: &Tensor) {
        let mut grad = self.0.grad.borrow_mut();
        match grad.as_mut() {
            Some(acc) => *acc += delta,
            None => *grad = Some(delta.clone()),
        }
    }

    fn summary(&self) -> String {
        let grad = self.grad().map_or("None".to_string(), |g| g.to_string());
        format!("Value({}, grad={})", self.payload(), grad)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.0.op {
            None => fmt.write_str(&self.summary()),
            Some(op) => fmt.write_fmt(format_args!(
                "{}({})",
                op.name,
                op.inputs.iter().map(Value::summary).join(", ")
            )),
        }
    }
}

pub mod viz {
    use super::*;
    use std::collections::HashMap;

    /// Renders the graph ending at `root` in Graphviz DOT format.
    pub fn render_dot(root: &Value) -> String {
        let (nodes_ids, edges, id_node_map) = trace(root.clone());

        let mut nodes_str = String::new();
        let mut edges_str = String::new();
        for node_id in nodes_ids.into_iter().sorted() {
            let node = &id_node_map[&node_id];
            let id_str = format!("{:08}", node_id);
            let grad = node.grad().map_or("None".to_string(), |g| g.to_string());
            nodes_str += &format!(
                "    \"{}\" [label=\"{{ shape {:?} | data {} | grad {} }}\" shape=record]\n",
                id_str,
                node.shape(),
                node.payload(),
                grad,
            );
            if let Some(op_name) = node.op_name() {
                nodes_str += &format!("    \"{}{}\" [label=\"{}\"]\n", id_str, op_name, op_name);
                edges_str += &format!("    \"{}{}\" -> \"{}\"\n", id_str, op_name, id_str);
            }
        }

        for (n1, n2) in edges.into_iter().sorted() {
            let op_name = id_node_map[&n2].op_name().unwrap_or_default();
            edges_str += &format!("    \"{:08}\" -> \"{:08}{}\"\n", n1, n2, op_name);
        }

        format!(
            "strict digraph {{\n    graph [rankdir=LR]\n\n{}{}}}",
            nodes_str, edges_str
        )
    }

    type NodeId = ValueId;
    type Edge = (NodeId, NodeId);

    fn trace(root: Value) -> (HashSet<NodeId>, HashSet<Edge>, HashMap<NodeId, Value>) {
        let mut nodes = HashSet::new();
        let mut edges = HashSet::new();
        let mut id_node_map = HashMap::new();

        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let node_id = node.id();
            if nodes.insert(node_id) {
                for child in node.inputs() {
                    edges.insert((child.id(), node_id));
                    stack.push(child.clone());
                }
                id_node_map.insert(node_id, node);
            }
        }

        (nodes, edges, id_node_map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use float_eq::*;

    #[test]
    fn init_tests_id() {
        let x = Value::tracked(1.0);
        let y = &x + &x;

        assert!(x.id() < y.id());
        assert_ne!(x.id(), y.id());
    }

    #[test]
    fn init_tests_grad() {
        let x = Value::tracked(1.0);
        let y = &x + &x;

        assert!(x.grad().is_none());
        assert!(y.grad().is_none());
    }

    #[test]
    fn test_square_grad() {
        let a = Value::tracked(3.0);
        let y = a.pow(2.);
        y.backward().unwrap();

        assert_float_eq!(y.item().unwrap(), 9.0, abs <= 1e-10);
        assert_float_eq!(a.grad().unwrap().item().unwrap(), 6.0, abs <= 1e-10);
        assert_float_eq!(y.grad().unwrap().item().unwrap(), 1.0, abs <= 1e-10);
    }

    #[test]
    fn test_self_add() {
        let x = Value::tracked(-2.0);
        let z = &x + &x;
        z.backward().unwrap();

        assert_float_eq!(x.grad().unwrap().item().unwrap(), 2.0, abs <= 1e-10);
        assert_float_eq!(z.item().unwrap(), -4.0, abs <= 1e-10);
    }

    #[test]
    fn test_diamond_accumulates_both_branches() {
        let x = Value::tracked(vec![1., -2., 3.]);
        let left = &x * &x;
        let right = &x * &x;
        let z = (&left + &right).sum();
        z.backward().unwrap();

        assert_eq!(x.grad().unwrap().data(), &[4., -8., 12.]);
    }

    #[test]
    fn test_shared_intermediate_propagates_once() {
        let x = Value::tracked(2.0);
        let y = x.pow(3.);
        let z = &y * &y;
        z.backward().unwrap();

        // z = x^6, dz/dx = 6 x^5
        assert_float_eq!(x.grad().unwrap().item().unwrap(), 192.0, abs <= 1e-10);
        assert_float_eq!(y.grad().unwrap().item().unwrap(), 16.0, abs <= 1e-10);
    }

    #[test]
    fn test_untracked_root() {
        let x = Value::constant(3.0);
        let y = x.pow(2.);

        assert!(!y.requires_grad());
        assert!(y.is_leaf());
        assert_eq!(y.backward(), Err(AutogradError::UntrackedRoot));
    }

    #[test]
    fn test_non_scalar_root_needs_seed() {
        let x = Value::tracked(vec![1., 2.]);
        let y = &x * 2.;

        assert!(matches!(
            y.backward(),
            Err(AutogradError::ShapeMismatch { .. })
        ));

        y.backward_with(Some(Tensor::vector(vec![1., 10.])), false)
            .unwrap();
        assert_eq!(x.grad().unwrap().data(), &[2., 20.]);
    }

    #[test]
    fn test_seed_shape_mismatch() {
        let x = Value::tracked(vec![1., 2.]);
        let y = &x * 2.;

        assert_eq!(
            y.backward_with(Some(Tensor::scalar(1.)), false),
            Err(AutogradError::ShapeMismatch {
                expected: vec![2],
                actual: vec![],
                operation: "backward seed".to_string(),
            })
        );
        assert!(x.grad().is_none());
    }

    #[test]
    fn test_released_graph() {
        let x = Value::tracked(3.0);
        let y = x.pow(2.);
        y.backward().unwrap();

        assert!(matches!(
            y.backward(),
            Err(AutogradError::InvalidBackwardTarget(_))
        ));
        assert_float_eq!(x.grad().unwrap().item().unwrap(), 6.0, abs <= 1e-10);
    }

    #[test]
    fn test_retained_graph_accumulates() {
        let x = Value::tracked(3.0);
        let y = x.pow(2.);
        y.backward_with(None, true).unwrap();
        y.backward().unwrap();

        assert_float_eq!(x.grad().unwrap().item().unwrap(), 12.0, abs <= 1e-10);

        x.reset_grad();
        assert!(x.grad().is_none());
    }

    #[test]
    fn test_leaf_reused_across_graphs_accumulates() {
        let x = Value::tracked(3.0);
        x.pow(2.).backward().unwrap();
        (&x * 4.).backward().unwrap();

        assert_float_eq!(x.grad().unwrap().item().unwrap(), 10.0, abs <= 1e-10);
    }

    #[test]
    fn test_requires_grad_is_monotonic() {
        let x = Value::tracked(vec![1., 2.]);
        let c = Value::constant(vec![3., 4.]);

        let chain = [
            &x + &c,
            &c * &x,
            x.sin(),
            (&c - &x).sigmoid(),
            ops::mean(&(&x / &c)),
        ];
        assert!(chain.iter().all(Value::requires_grad));
        assert!(chain.iter().all(|v| !v.is_leaf()));

        let untouched = (&c * &c).sum();
        assert!(!untouched.requires_grad());
        assert!(untouched.is_leaf());
    }

    #[test]
    fn test_detach_blocks_gradient() {
        let x = Value::tracked(vec![1., 2.]);
        let d = x.detach();
        let y = (&d * &d).sum() + (&x * 3.).sum();
        y.backward().unwrap();

        assert!(!d.requires_grad());
        assert!(d.grad().is_none());
        assert_eq!(x.grad().unwrap().data(), &[3., 3.]);
    }

    #[test]
    fn test_detach_shares_payload() {
        let x = Value::tracked(vec![1., 2.]);
        let d = x.detach();
        x.set_data(Tensor::vector(vec![5., 6.])).unwrap();

        assert_eq!(d.data().data(), &[5., 6.]);
        assert!(x.set_data(Tensor::scalar(1.)).is_err());
    }

    #[test]
    fn test_clone_is_pass_through() {
        let x = Value::tracked(vec![3., 4.]);
        let c = x.clone_node();
        let y = (&c * &c).sum();
        y.backward().unwrap();

        assert!(c.requires_grad());
        assert_eq!(c.op_name(), Some("clone"));
        assert_eq!(c.grad().unwrap(), x.grad().unwrap());
        assert_eq!(x.grad().unwrap().data(), &[6., 8.]);
    }

    #[test]
    fn test_untracked_leaf_has_no_grad() {
        let x = Value::tracked(2.0);
        let k = Value::constant(5.0);
        let y = &x * &k;
        y.backward().unwrap();

        assert!(k.grad().is_none());
        assert_float_eq!(x.grad().unwrap().item().unwrap(), 5.0, abs <= 1e-10);
    }

    #[test]
    fn init_tests_display() {
        let x = Value::tracked(1.0);
        let y = x.relu();
        let z = &x + &y;
        z.backward().unwrap();

        assert_eq!(format!("{}", x), "Value(1.000000, grad=2.000000)");
        assert_eq!(format!("{}", y), "relu(Value(1.000000, grad=2.000000))");
        assert_eq!(
            format!("{}", z),
            "add(Value(1.000000, grad=2.000000), Value(1.000000, grad=1.000000))"
        );

        let k = Value::constant(vec![1., 2.]);
        assert_eq!(format!("{}", k), "Value([1.000000, 2.000000], grad=None)");
    }

    #[test]
    fn test_render_dot() {
        let x = Value::tracked(2.0);
        let y = &x * 3.;
        let dot = viz::render_dot(&y);

        assert!(dot.starts_with("strict digraph {"));
        assert!(dot.contains(&format!("\"{:08}mul\" [label=\"mul\"]", y.id())));
        assert!(dot.contains(&format!("\"{:08}\" -> \"{:08}mul\"", x.id(), y.id())));
    }

    #[test]
    fn test_scalar_like_roots_are_seeded_in_shape() {
        let v = Value::tracked(vec![2.]);
        let y = &v * &v;
        y.backward().unwrap();

        assert_eq!(y.grad().unwrap(), Tensor::vector(vec![1.]));
        assert_eq!(v.grad().unwrap(), Tensor::vector(vec![4.]));

        let m = Value::tracked(Tensor::matrix(1, 1, vec![3.]).unwrap());
        let y = m.pow(2.);
        y.backward().unwrap();

        assert_eq!(y.grad().unwrap().shape(), &[1, 1]);
        let grad = m.grad().unwrap();
        assert_eq!(grad.shape(), &[1, 1]);
        assert_float_eq!(grad.item().unwrap(), 6.0, abs <= 1e-10);
    }

    fn failing_backward(_args: &[Value], _out_data: &Tensor, _out_grad: &Tensor) -> Result<Vec<Tensor>> {
        Err(AutogradError::InvalidBackwardTarget("rule failed".to_string()))
    }

    #[test]
    fn test_failing_rule_leaves_state_untouched() {
        let x = Value::tracked(2.0);
        let y = &x * 2.;
        let broken = Value::from_op(y.data(), "broken", vec![y.clone()], failing_backward);
        let z = &broken * 3.;

        let err = AutogradError::InvalidBackwardTarget("rule failed".to_string());
        assert_eq!(z.backward(), Err(err.clone()));
        assert!(z.grad().is_none());
        assert!(broken.grad().is_none());
        assert!(x.grad().is_none());

        // not released either: the same rule fails again
        assert_eq!(z.backward(), Err(err));
    }

    #[test]
    fn test_deep_chain_backward_and_drop() {
        let x = Value::tracked(1.0);
        let mut acc = &x * 1.;
        for _ in 0..100_000 {
            acc = &acc + &x;
        }
        acc.backward().unwrap();
        assert_float_eq!(x.grad().unwrap().item().unwrap(), 100_001.0, abs <= 1e-6);

        drop(acc);
        assert_float_eq!(x.item().unwrap(), 1.0, abs <= 1e-10);
    }

    #[test]
    fn test_deep_chain_drop_without_backward() {
        let x = Value::tracked(1.0);
        let mut acc = x.clone_node();
        for _ in 0..100_000 {
            acc = acc.sin();
        }
        assert!(acc.requires_grad());
        drop(acc);
        assert!(x.grad().is_none());
    }

    #[test]
    fn test_render_dot_deep_chain() {
        let x = Value::tracked(0.5);
        let mut acc = x.clone_node();
        for _ in 0..50_000 {
            acc = acc.exp().ln();
        }
        let dot = viz::render_dot(&acc);

        assert_eq!(dot.matches("shape=record").count(), 100_002);
    }
}
