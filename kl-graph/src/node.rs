use std::collections::BTreeMap;

use crate::bound::{BoundValue, Promise};
use crate::error::{GraphError, GraphResult};

/// A compiled kernel together with its argument table and execution state.
///
/// Nodes are owned by a [KernelGraph](crate::graph::KernelGraph) and are read through `graph[kernel]`,
/// all mutation goes through the graph since binding may need the device and the graph-wide element count.
#[derive(Debug)]
pub struct KernelNode<K, B> {
    id: String,
    kernel: K,
    arity: usize,

    args: BTreeMap<u32, BoundValue<B>>,
    vector_size: Option<usize>,

    execution_count: u32,
    // set by every bind, cleared by a successful execution
    dirty: bool,
    executed_at: Option<u64>,
}

impl<K, B> KernelNode<K, B> {
    pub(crate) fn new(id: String, kernel: K, arity: usize) -> Self {
        KernelNode {
            id,
            kernel,
            arity,
            args: BTreeMap::new(),
            vector_size: None,
            execution_count: 0,
            dirty: true,
            executed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// The number of arguments the compiled kernel declares.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// The element count fixed by the first bound input, if any.
    pub fn vector_size(&self) -> Option<usize> {
        self.vector_size
    }

    /// How many times this kernel has executed successfully.
    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn has_executed(&self) -> bool {
        self.execution_count > 0
    }

    /// Whether a binding changed since the last successful execution.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, position: u32) -> Option<&BoundValue<B>> {
        self.args.get(&position)
    }

    /// All bindings, in position order.
    pub fn bindings(&self) -> impl Iterator<Item = (u32, &BoundValue<B>)> {
        self.args.iter().map(|(&pos, value)| (pos, value))
    }

    pub fn promises(&self) -> impl Iterator<Item = &Promise> {
        self.args.values().filter_map(|value| value.as_promise())
    }

    pub fn bound_count(&self) -> usize {
        self.args.len()
    }

    /// The positions below the arity that have nothing bound yet.
    pub fn missing_positions(&self) -> Vec<u32> {
        (0..self.arity as u32).filter(|pos| !self.args.contains_key(pos)).collect()
    }

    pub(crate) fn executed_at(&self) -> Option<u64> {
        self.executed_at
    }

    pub(crate) fn check_position(&self, position: u32) -> GraphResult<()> {
        if (position as usize) < self.arity {
            Ok(())
        } else {
            Err(GraphError::PositionOutOfRange {
                id: self.id.clone(),
                position,
                arity: self.arity,
            })
        }
    }

    pub(crate) fn check_complete(&self) -> GraphResult<()> {
        let missing = self.missing_positions();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GraphError::IncompleteArguments {
                id: self.id.clone(),
                arity: self.arity,
                bound: self.args.len(),
                missing,
            })
        }
    }

    /// The first bound input fixes the element count, later inputs must match it.
    pub(crate) fn check_vector_size(&self, position: u32, len: usize) -> GraphResult<()> {
        match self.vector_size {
            Some(expected) if expected != len => Err(GraphError::SizeMismatch {
                id: self.id.clone(),
                position,
                expected,
                actual: len,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn fix_vector_size(&mut self, len: usize) {
        self.vector_size.get_or_insert(len);
    }

    /// Bind `value` at `position`, returning the binding it replaces.
    pub(crate) fn bind(&mut self, position: u32, value: BoundValue<B>) -> Option<BoundValue<B>> {
        self.dirty = true;
        self.args.insert(position, value)
    }

    /// Remove all owned buffers, leaving scalars and promises in place.
    pub(crate) fn take_buffers(&mut self) -> Vec<B> {
        let positions = self
            .args
            .iter()
            .filter(|(_, value)| value.as_buffer().is_some())
            .map(|(&pos, _)| pos)
            .collect::<Vec<_>>();

        if !positions.is_empty() {
            self.dirty = true;
        }

        positions
            .into_iter()
            .filter_map(|pos| match self.args.remove(&pos) {
                Some(BoundValue::Buffer { buffer, .. }) => Some(buffer),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_executed(&mut self, stamp: u64) {
        self.execution_count += 1;
        self.dirty = false;
        self.executed_at = Some(stamp);
    }

    pub(crate) fn into_parts(self) -> (K, Vec<B>) {
        let buffers = self
            .args
            .into_values()
            .filter_map(|value| match value {
                BoundValue::Buffer { buffer, .. } => Some(buffer),
                BoundValue::Scalar(_) | BoundValue::Promise(_) => None,
            })
            .collect();
        (self.kernel, buffers)
    }
}
