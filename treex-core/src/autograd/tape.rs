use super::backward_op::BackwardOp;
use crate::error::{Result, TreexError};
use crate::tensor::{broadcast_utils::broadcast_zip, ones, Tensor};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// An operation recorded on the tape.
#[derive(Debug, Clone)]
struct Node {
    /// `None` for watched leaves.
    op: Option<Arc<dyn BackwardOp>>,
    /// Tape positions of the inputs; `None` for constant operands.
    inputs: Vec<Option<usize>>,
}

/// Link from a tensor to the tape node that produced it.
///
/// Holds a weak reference: once the tape is dropped the tensor behaves as a
/// constant again.
#[derive(Debug, Clone)]
pub(crate) struct Trace {
    tape: Weak<Tape>,
    node: usize,
}

impl Trace {
    pub(crate) fn upgrade(&self) -> Option<(Arc<Tape>, usize)> {
        self.tape.upgrade().map(|tape| (tape, self.node))
    }
}

/// The tape that records the computation graph.
///
/// Nodes are appended in evaluation order, so the node list is already a
/// topological order of the graph.
#[derive(Debug, Default)]
pub struct Tape {
    nodes: Mutex<Vec<Node>>,
}

impl Tape {
    /// Create a new empty tape.
    pub fn new() -> Arc<Self> {
        Arc::new(Tape::default())
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts tracing `tensor`: returns a copy registered as an input of this tape.
    pub fn watch(self: &Arc<Self>, tensor: &Tensor) -> Tensor {
        let trace = self.push(Node {
            op: None,
            inputs: Vec::new(),
        });
        tensor.detach().with_trace(trace)
    }

    pub(crate) fn record(self: &Arc<Self>, inputs: Vec<Option<usize>>, op: Arc<dyn BackwardOp>) -> Trace {
        self.push(Node {
            op: Some(op),
            inputs,
        })
    }

    fn push(self: &Arc<Self>, node: Node) -> Trace {
        let mut nodes = self.lock();
        let index = nodes.len();
        nodes.push(node);
        Trace {
            tape: Arc::downgrade(self),
            node: index,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Node>> {
        match self.nodes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Tape mutex was poisoned. Recovering guard.");
                poisoned.into_inner()
            }
        }
    }

    /// Back-propagates from `root` and returns the gradient of every node.
    ///
    /// # Errors
    /// * [`TreexError::MissingState`] if `root` is not traced on this tape.
    /// * [`TreexError::ShapeMismatch`] if a backward op returns a gradient of
    ///   the wrong shape.
    pub fn gradients(self: &Arc<Self>, root: &Tensor) -> Result<Gradients> {
        let root_node = match root.live_trace() {
            Some((tape, node)) if Arc::ptr_eq(&tape, self) => node,
            _ => {
                return Err(TreexError::missing(
                    "",
                    "backward root is not traced on this tape",
                ))
            }
        };
        // Snapshot the graph so no lock is held while backward ops run.
        let nodes: Vec<Node> = self.lock()[..=root_node].to_vec();
        log::trace!("Back-propagating through {} tape nodes", nodes.len());

        let mut grads: Vec<Option<Tensor>> = vec![None; nodes.len()];
        grads[root_node] = Some(ones(root.shape()));

        for index in (0..nodes.len()).rev() {
            let node = &nodes[index];
            let (Some(op), Some(grad_output)) = (&node.op, grads[index].clone()) else {
                continue;
            };
            let input_grads = op.backward(&grad_output)?;
            if input_grads.len() != node.inputs.len() {
                return Err(TreexError::Internal(format!(
                    "{:?} returned {} gradients for {} inputs",
                    op,
                    input_grads.len(),
                    node.inputs.len()
                )));
            }
            for (input, grad) in node.inputs.iter().zip(input_grads) {
                let Some(input) = *input else { continue };
                grads[input] = Some(match grads[input].take() {
                    None => grad,
                    Some(existing) => {
                        if existing.shape() != grad.shape() {
                            return Err(TreexError::shape(
                                "",
                                existing.shape(),
                                grad.shape(),
                                "gradient accumulation",
                            ));
                        }
                        broadcast_zip(&existing, &grad, |a, b| a + b)?
                    }
                });
            }
        }
        Ok(Gradients {
            tape: Arc::downgrade(self),
            grads,
        })
    }
}

/// Gradients produced by [`Tape::gradients`], indexed by tape node.
#[derive(Debug)]
pub struct Gradients {
    tape: Weak<Tape>,
    grads: Vec<Option<Tensor>>,
}

impl Gradients {
    /// Gradient with respect to `tensor`, if it was traced on the same tape
    /// and contributed to the root.
    pub fn get(&self, tensor: &Tensor) -> Option<&Tensor> {
        let trace = tensor.trace.as_ref()?;
        if !Weak::ptr_eq(&trace.tape, &self.tape) {
            return None;
        }
        self.grads.get(trace.node).and_then(Option::as_ref)
    }
}
