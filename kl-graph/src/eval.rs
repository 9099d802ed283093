//! Lazy, memoized evaluation of a [KernelGraph].
//!
//! Evaluating a kernel first walks the promise edges depth-first to collect every kernel it transitively
//! depends on, checking argument completeness and detecting cycles before anything runs.
//! The collected kernels are then visited in dependency order, and each one executes only if it is stale:
//! * it has never executed,
//! * a binding changed since it last executed, or
//! * one of its promise sources executed more recently than it did.

use itertools::Itertools;
use log::{debug, trace};

use crate::bound::BoundValue;
use crate::device::{Device, LaunchArg};
use crate::dtype::Element;
use crate::error::{GraphError, GraphResult};
use crate::graph::{resolve, Kernel, KernelGraph};

/// The kernels executed by a single evaluation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Evaluation {
    pub target: Kernel,
    /// The kernels that actually ran, in execution order.
    pub executed: Vec<Kernel>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Debug, Copy, Clone)]
enum Visit {
    Enter(Kernel),
    Exit(Kernel),
}

impl Evaluation {
    pub fn was_executed(&self, kernel: Kernel) -> bool {
        self.executed.contains(&kernel)
    }

    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }
}

impl<D: Device, T: Element> KernelGraph<D, T> {
    /// Evaluate the kernel registered as `id`, see [Self::evaluate_kernel].
    pub fn evaluate(&mut self, id: &str) -> GraphResult<Evaluation> {
        let kernel = self.get(id)?;
        self.evaluate_kernel(kernel)
    }

    /// Execute `kernel` and everything it transitively depends on through promises,
    /// skipping kernels whose outputs are still up to date.
    ///
    /// Each kernel runs at most once per call and blocks until the device has finished it.
    /// Any error aborts the evaluation immediately, kernels that already ran keep their new outputs.
    pub fn evaluate_kernel(&mut self, kernel: Kernel) -> GraphResult<Evaluation> {
        self.check_contains(kernel);

        let order = self.schedule(kernel)?;
        let mut executed = vec![];

        for curr in order {
            if self.is_stale(curr) {
                self.execute(curr)?;
                executed.push(curr);
            } else {
                trace!("Kernel '{}' is up to date", self[curr].id());
            }
        }

        debug!(
            "Evaluated '{}', executed [{}]",
            self[kernel].id(),
            executed.iter().map(|&k| self[k].id()).join(", ")
        );
        Ok(Evaluation {
            target: kernel,
            executed,
        })
    }

    /// Collect `root` and all kernels it depends on, dependencies first.
    fn schedule(&self, root: Kernel) -> GraphResult<Vec<Kernel>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path: Vec<Kernel> = vec![];
        let mut order = vec![];
        let mut stack = vec![Visit::Enter(root)];

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(curr) => match marks[curr.index] {
                    Mark::Done => {}
                    Mark::InProgress => {
                        let start = path.iter().position(|&k| k == curr).unwrap_or(0);
                        let cycle = path[start..]
                            .iter()
                            .chain(std::iter::once(&curr))
                            .map(|&k| self[k].id().to_owned())
                            .collect_vec();
                        return Err(GraphError::Cycle { path: cycle });
                    }
                    Mark::Unvisited => {
                        let node = &self[curr];
                        node.check_complete()?;
                        self.work_size(curr)?;

                        marks[curr.index] = Mark::InProgress;
                        path.push(curr);
                        stack.push(Visit::Exit(curr));

                        // reversed so sources are entered in position order
                        let sources = node.promises().map(|p| p.source).collect_vec();
                        stack.extend(sources.into_iter().rev().map(Visit::Enter));
                    }
                },
                Visit::Exit(curr) => {
                    marks[curr.index] = Mark::Done;
                    path.pop();
                    order.push(curr);
                }
            }
        }

        Ok(order)
    }

    fn is_stale(&self, kernel: Kernel) -> bool {
        let node = &self[kernel];
        if node.is_dirty() || !node.has_executed() {
            return true;
        }
        node.promises()
            .any(|promise| self[promise.source].executed_at() > node.executed_at())
    }

    /// The kernel's own element count, falling back to the graph-wide one.
    fn work_size(&self, kernel: Kernel) -> GraphResult<usize> {
        let node = &self[kernel];
        node.vector_size()
            .or(self.vector_size)
            .ok_or_else(|| GraphError::UndeterminedWorkSize {
                id: node.id().to_owned(),
            })
    }

    fn execute(&mut self, kernel: Kernel) -> GraphResult<()> {
        let work_size = self.work_size(kernel)?;

        let KernelGraph { nodes, device, .. } = self;
        let node = &nodes[kernel.index];

        let mut args = Vec::with_capacity(node.arity());
        for position in 0..node.arity() as u32 {
            let value = node.get(position).ok_or_else(|| GraphError::Unbound {
                id: node.id().to_owned(),
                position,
            })?;

            let arg = match value {
                BoundValue::Scalar(scalar) => LaunchArg::Scalar(scalar.bytes()),
                BoundValue::Buffer { buffer, .. } => LaunchArg::Buffer(buffer),
                BoundValue::Promise(promise) => {
                    let source = &nodes[promise.source.index];
                    let unresolved = |found| GraphError::UnresolvedPromise {
                        id: node.id().to_owned(),
                        position,
                        source_id: source.id().to_owned(),
                        source_position: promise.source_position,
                        found,
                    };

                    match resolve(nodes, promise.source, promise.source_position, true) {
                        Ok((_, _, BoundValue::Buffer { buffer, .. })) => LaunchArg::Buffer(buffer),
                        Ok((_, _, other)) => return Err(unresolved(other.kind_name())),
                        Err(GraphError::Unbound { .. }) => return Err(unresolved("nothing")),
                        Err(e) => return Err(e),
                    }
                }
            };
            args.push(arg);
        }

        debug!(
            "Executing kernel '{}' with work size {} and {} arguments",
            node.id(),
            work_size,
            args.len()
        );

        device
            .execute(node.kernel(), &args, work_size)
            .map_err(|error| GraphError::Execution {
                id: node.id().to_owned(),
                error,
            })?;

        let stamp = self.next_stamp();
        self.nodes[kernel.index].mark_executed(stamp);
        Ok(())
    }
}
