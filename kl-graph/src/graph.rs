use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;
use std::ops::Index;

use bytemuck::Pod;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, warn};
use rand::random;

use crate::bound::{BoundValue, Scalar};
use crate::device::{BufferStore, Device, DeviceError, KernelCompiler};
use crate::dtype::{bytes_to_elements, elements_to_bytes, Element};
use crate::error::{GraphError, GraphResult};
use crate::node::KernelNode;
use crate::settings::GraphSettings;
use crate::util::{format_values, prefix_line_numbers};

/// The node type stored in a graph running on device `D`.
pub type DeviceNode<D> = KernelNode<<D as KernelCompiler>::Kernel, <D as BufferStore>::Buffer>;

/// A registry of compiled kernels, linked into a graph by promises.
///
/// Kernels are loaded once and live as long as the graph. Edges are not stored separately:
/// a promise bound on kernel `B` that refers to kernel `A` is the edge `A -> B`.
/// Evaluating a kernel lazily executes exactly the kernels it transitively depends on,
/// reusing outputs that are still up to date.
///
/// This type implements `Index<Kernel>`, so `graph[kernel]` gives read access to a [KernelNode].
///
/// ```no_run
/// # use kl_graph::device::Device;
/// # use kl_graph::graph::KernelGraph;
/// # fn demo<D: Device>(device: D) -> kl_graph::error::GraphResult<()> {
/// let mut graph: KernelGraph<D, f32> = KernelGraph::new(device);
///
/// let square = graph.load("square")?;
/// graph.bind_input(square, 0, &[1.0, 2.0, 3.0])?;
/// graph.bind_output(square, 1, None)?;
///
/// let add = graph.load("add")?;
/// graph.bind_input(add, 0, &[10.0, 20.0, 30.0])?;
/// graph.bind_output(add, 2, None)?;
/// graph.link(square, add, None, [(1, 1)])?;
///
/// graph.evaluate("add")?;
/// assert_eq!(graph.get_buffer(add, 2)?, vec![11.0, 24.0, 39.0]);
/// # Ok(())
/// # }
/// ```
pub struct KernelGraph<D: Device, T: Element = f32> {
    check: u32,
    pub(crate) device: D,
    settings: GraphSettings,

    pub(crate) nodes: Vec<DeviceNode<D>>,
    ids: IndexMap<String, Kernel>,

    pub(crate) vector_size: Option<usize>,
    last_stamp: u64,

    ph: PhantomData<T>,
}

/// A kernel in a [KernelGraph].
///
/// Handles are only valid for the graph that created them, using one on another graph panics.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Kernel {
    pub(crate) index: usize,
    check: u32,
}

impl<D: Device, T: Element> Index<Kernel> for KernelGraph<D, T> {
    type Output = DeviceNode<D>;

    fn index(&self, kernel: Kernel) -> &Self::Output {
        self.check_contains(kernel);
        &self.nodes[kernel.index]
    }
}

impl<D: Device, T: Element> KernelGraph<D, T> {
    pub fn new(device: D) -> Self {
        Self::with_settings(device, GraphSettings::default())
    }

    pub fn with_settings(device: D, settings: GraphSettings) -> Self {
        if settings.debug {
            info!("Using device\n{}", device.properties());
        }

        KernelGraph {
            check: random(),
            device,
            vector_size: settings.vector_size,
            settings,
            nodes: vec![],
            ids: IndexMap::new(),
            last_stamp: 0,
            ph: PhantomData,
        }
    }

    pub(crate) fn check_contains(&self, kernel: Kernel) {
        assert_eq!(
            kernel.check, self.check,
            "Kernel {:?} does not belong to this graph",
            kernel
        );
        assert!(kernel.index < self.nodes.len());
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// The graph-wide element count, used by kernels that have none of their own.
    pub fn vector_size(&self) -> Option<usize> {
        self.vector_size
    }

    pub fn set_vector_size(&mut self, vector_size: Option<usize>) {
        self.vector_size = vector_size;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all kernels, in load order.
    pub fn kernels(&self) -> impl Iterator<Item = Kernel> + '_ {
        self.ids.values().copied()
    }

    pub fn kernel(&self, id: &str) -> Option<Kernel> {
        self.ids.get(id).copied()
    }

    /// Like [Self::kernel], but an unknown identifier is an error.
    pub fn get(&self, id: &str) -> GraphResult<Kernel> {
        self.kernel(id).ok_or_else(|| GraphError::UnknownKernel { id: id.to_owned() })
    }

    /// Load and compile the kernel `id`, with source text taken from the configured [KernelSource](crate::settings::KernelSource).
    /// The kernel entry point must be called `id`.
    pub fn load(&mut self, id: &str) -> GraphResult<Kernel> {
        self.check_unique(id)?;

        let source = match self.settings.source.path_for(id) {
            None => String::new(),
            Some(path) => std::fs::read_to_string(&path).map_err(|error| GraphError::SourceUnavailable {
                id: id.to_owned(),
                path,
                error,
            })?,
        };

        self.load_source(id, &source)
    }

    /// Compile `source` and register the kernel with entry point `id` under that identifier.
    pub fn load_source(&mut self, id: &str, source: &str) -> GraphResult<Kernel> {
        self.check_unique(id)?;

        let compiled = self.device.compile(source, id).map_err(|error| {
            warn!(
                "Failed to compile kernel '{}'\nSource:\n{}\nLog:\n{}",
                id,
                prefix_line_numbers(&error.source_text),
                error.log
            );
            GraphError::Compile {
                id: id.to_owned(),
                error,
            }
        })?;

        if !compiled.log.is_empty() {
            warn!(
                "Kernel '{}' compiled with messages\nSource:\n{}\nLog:\n{}",
                id,
                prefix_line_numbers(source),
                compiled.log
            );
        }

        let arity = self.device.arity(&compiled.kernel);
        let kernel = Kernel {
            index: self.nodes.len(),
            check: self.check,
        };

        self.nodes.push(KernelNode::new(id.to_owned(), compiled.kernel, arity));
        self.ids.insert(id.to_owned(), kernel);

        info!("Loaded kernel '{}' with {} arguments as {:?}", id, arity, kernel);
        Ok(kernel)
    }

    fn check_unique(&self, id: &str) -> GraphResult<()> {
        if self.ids.contains_key(id) {
            Err(GraphError::DuplicateKernel { id: id.to_owned() })
        } else {
            Ok(())
        }
    }

    /// Copy `data` into a new device buffer and bind it at `position`.
    ///
    /// The first input bound on a kernel fixes its element count, and the graph-wide one if that is not set yet.
    pub fn bind_input(&mut self, kernel: Kernel, position: u32, data: &[T]) -> GraphResult<()> {
        self.check_contains(kernel);
        let node = &self.nodes[kernel.index];
        node.check_position(position)?;
        node.check_vector_size(position, data.len())?;

        let buffer = self.alloc(kernel, position, data.len())?;
        if let Err(error) = self.device.write(&buffer, elements_to_bytes(data)) {
            self.device.release(buffer);
            return Err(self.device_error(kernel, position, error));
        }

        let node = &mut self.nodes[kernel.index];
        node.fix_vector_size(data.len());
        if self.vector_size.is_none() {
            debug!("Graph element count set to {} by kernel '{}'", data.len(), node.id());
            self.vector_size = Some(data.len());
        }

        debug!("Bound input of length {} at {:?}[{}]", data.len(), kernel, position);
        self.replace(kernel, position, BoundValue::from_buffer(buffer, data.len()));
        Ok(())
    }

    /// Allocate an output buffer and bind it at `position`.
    ///
    /// The element count is, in order of priority: `len`, the kernel's own element count, the graph-wide one.
    pub fn bind_output(&mut self, kernel: Kernel, position: u32, len: Option<usize>) -> GraphResult<()> {
        self.check_contains(kernel);
        let node = &self.nodes[kernel.index];
        node.check_position(position)?;

        let len = len
            .or(node.vector_size())
            .or(self.vector_size)
            .ok_or_else(|| GraphError::UndeterminedSize {
                id: node.id().to_owned(),
                position,
            })?;

        let buffer = self.alloc(kernel, position, len)?;

        debug!("Bound output of length {} at {:?}[{}]", len, kernel, position);
        self.replace(kernel, position, BoundValue::from_buffer(buffer, len));
        Ok(())
    }

    /// Bind a literal value at `position`. This does not affect the element count.
    pub fn bind_scalar<S: Pod>(&mut self, kernel: Kernel, position: u32, value: S) -> GraphResult<()> {
        let scalar = Scalar::from_value(value).ok_or_else(|| GraphError::InvalidScalar {
            id: self[kernel].id().to_owned(),
            position,
            reason: format!("zero-sized type {}", std::any::type_name::<S>()),
        })?;
        self.bind_scalar_value(kernel, position, scalar)
    }

    /// Bind a literal value given as raw bytes at `position`.
    pub fn bind_scalar_bytes(&mut self, kernel: Kernel, position: u32, bytes: Vec<u8>) -> GraphResult<()> {
        let scalar = Scalar::from_bytes(bytes).ok_or_else(|| GraphError::InvalidScalar {
            id: self[kernel].id().to_owned(),
            position,
            reason: "empty byte string".to_owned(),
        })?;
        self.bind_scalar_value(kernel, position, scalar)
    }

    fn bind_scalar_value(&mut self, kernel: Kernel, position: u32, scalar: Scalar) -> GraphResult<()> {
        self[kernel].check_position(position)?;

        debug!("Bound {:?} at {:?}[{}]", scalar, kernel, position);
        self.replace(kernel, position, BoundValue::Scalar(scalar));
        Ok(())
    }

    /// Promise that `target_position` of `target` will receive the buffer at `source_position` of `source`.
    ///
    /// No data is moved now, the buffer is handed over when `target` is evaluated.
    pub fn bind_promise(
        &mut self,
        target: Kernel,
        source: Kernel,
        source_position: u32,
        target_position: u32,
    ) -> GraphResult<()> {
        self[source].check_position(source_position)?;
        self[target].check_position(target_position)?;

        debug!(
            "Bound promise {:?}[{}] -> {:?}[{}]",
            source, source_position, target, target_position
        );
        let value = BoundValue::promise(source, source_position, target_position);
        self.replace(target, target_position, value);
        Ok(())
    }

    /// For each `(source_position, target_position)` pair, bind an output on `source`
    /// and a promise for it on `target`. `len` is the element count of the new outputs.
    pub fn link(
        &mut self,
        source: Kernel,
        target: Kernel,
        len: Option<usize>,
        mapping: impl IntoIterator<Item = (u32, u32)>,
    ) -> GraphResult<()> {
        for (source_position, target_position) in mapping {
            self.bind_output(source, source_position, len)?;
            self.bind_promise(target, source, source_position, target_position)?;
        }
        Ok(())
    }

    /// Force `kernel` to execute again on its next evaluation.
    pub fn invalidate(&mut self, kernel: Kernel) {
        self.check_contains(kernel);
        self.nodes[kernel.index].invalidate();
    }

    /// Release all buffers owned by `kernel`. Positions that held them become unbound.
    pub fn release_buffers(&mut self, kernel: Kernel) {
        self.check_contains(kernel);
        let buffers = self.nodes[kernel.index].take_buffers();
        debug!("Releasing {} buffers of {:?}", buffers.len(), kernel);
        for buffer in buffers {
            self.device.release(buffer);
        }
    }

    /// Read back the contents of `position`.
    ///
    /// A promise is followed to the buffer it refers to, which requires the source kernel to have executed.
    /// A scalar is returned as a single element if it has the size of `T`.
    pub fn get_buffer(&self, kernel: Kernel, position: u32) -> GraphResult<Vec<T>> {
        let (owner, owner_position, value) = resolve(&self.nodes, kernel, position, true)?;
        let id = || self.nodes[owner.index].id().to_owned();

        match value {
            BoundValue::Scalar(scalar) => scalar.read::<T>().map(|x| vec![x]).ok_or_else(|| GraphError::ScalarSize {
                id: id(),
                position: owner_position,
                scalar_bytes: scalar.bytes().len(),
                element_bytes: std::mem::size_of::<T>(),
            }),
            BoundValue::Buffer { buffer, len } => {
                // alloc already checked this product for overflow
                let bytes = self
                    .device
                    .read(buffer, len.saturating_mul(std::mem::size_of::<T>()))
                    .map_err(|error| GraphError::Read {
                        id: id(),
                        position: owner_position,
                        error,
                    })?;
                Ok(bytes_to_elements(&bytes))
            }
            BoundValue::Promise(_) => unreachable!("resolve never returns a promise"),
        }
    }

    /// Render every binding of `kernel` and the current contents of its buffers.
    pub fn dump_buffers(&self, kernel: Kernel) -> GraphResult<String> {
        let node = &self[kernel];
        let mut result = format!("Kernel '{}' {{\n", node.id());

        for (position, value) in node.bindings() {
            let line = match value {
                BoundValue::Scalar(scalar) => match scalar.read::<T>() {
                    Some(x) => format!("scalar {} = {}", scalar.type_name(), x),
                    None => format!("scalar {} = {:?}", scalar.type_name(), scalar.bytes()),
                },
                BoundValue::Buffer { len, .. } => {
                    format!("buffer[{}] = {}", len, format_values(&self.get_buffer(kernel, position)?))
                }
                BoundValue::Promise(promise) => {
                    let source = &self[promise.source];
                    let prefix = format!("promise '{}'[{}]", source.id(), promise.source_position);
                    match resolve(&self.nodes, kernel, position, true) {
                        Err(GraphError::NotExecuted { .. }) => format!("{} (pending)", prefix),
                        _ => format!("{} = {}", prefix, format_values(&self.get_buffer(kernel, position)?)),
                    }
                }
            };
            result.push_str(&format!("  {}: {}\n", position, line));
        }

        result.push('}');
        Ok(result)
    }

    /// Print [Self::dump_buffers] to stdout.
    pub fn show_buffers(&self, kernel: Kernel) -> GraphResult<()> {
        println!("{}", self.dump_buffers(kernel)?);
        Ok(())
    }

    pub(crate) fn next_stamp(&mut self) -> u64 {
        self.last_stamp += 1;
        self.last_stamp
    }

    fn alloc(&mut self, kernel: Kernel, position: u32, len: usize) -> GraphResult<D::Buffer> {
        let element_bytes = std::mem::size_of::<T>();
        let len_bytes = len.checked_mul(element_bytes).ok_or_else(|| {
            let error = DeviceError::Allocation {
                len_bytes: usize::MAX,
                reason: format!("{} elements of {} bytes overflow the address space", len, element_bytes),
            };
            self.device_error(kernel, position, error)
        })?;

        self.device
            .allocate(len_bytes)
            .map_err(|error| self.device_error(kernel, position, error))
    }

    fn device_error(&self, kernel: Kernel, position: u32, error: DeviceError) -> GraphError {
        GraphError::Device {
            id: self.nodes[kernel.index].id().to_owned(),
            position,
            error,
        }
    }

    /// Bind `value`, releasing the buffer it replaces if there was one.
    fn replace(&mut self, kernel: Kernel, position: u32, value: BoundValue<D::Buffer>) {
        let old = self.nodes[kernel.index].bind(position, value);
        if let Some(BoundValue::Buffer { buffer, .. }) = old {
            self.device.release(buffer);
        }
    }
}

/// Follow promises starting at `position` of `kernel` until reaching a scalar or an owned buffer.
///
/// Returns the kernel and position that own the final binding.
/// If `require_executed` is set, every promise passed must have an executed source.
pub(crate) fn resolve<K, B>(
    nodes: &[KernelNode<K, B>],
    kernel: Kernel,
    position: u32,
    require_executed: bool,
) -> GraphResult<(Kernel, u32, &BoundValue<B>)> {
    let mut current = (kernel, position);
    let mut path = vec![];

    loop {
        let (kernel, position) = current;
        let node = &nodes[kernel.index];
        let value = node.get(position).ok_or_else(|| GraphError::Unbound {
            id: node.id().to_owned(),
            position,
        })?;

        let promise = match value {
            BoundValue::Promise(promise) => promise,
            BoundValue::Scalar(_) | BoundValue::Buffer { .. } => return Ok((kernel, position, value)),
        };

        let source = &nodes[promise.source.index];
        if require_executed && !source.has_executed() {
            return Err(GraphError::NotExecuted {
                id: node.id().to_owned(),
                position,
                source_id: source.id().to_owned(),
            });
        }

        path.push(node.id().to_owned());
        if path.len() > nodes.len() {
            return Err(GraphError::Cycle { path });
        }

        current = (promise.source, promise.source_position);
    }
}

impl<D: Device, T: Element> Drop for KernelGraph<D, T> {
    fn drop(&mut self) {
        for node in std::mem::take(&mut self.nodes) {
            let (kernel, buffers) = node.into_parts();
            for buffer in buffers {
                self.device.release(buffer);
            }
            self.device.release_kernel(kernel);
        }
    }
}

impl<D: Device, T: Element> Debug for KernelGraph<D, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelGraph")
            .field("kernels", &self.ids.keys().collect_vec())
            .field("vector_size", &self.vector_size)
            .finish_non_exhaustive()
    }
}

impl<D: Device, T: Element> Display for KernelGraph<D, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "KernelGraph {{")?;
        writeln!(f, "  check: {},", self.check)?;
        writeln!(f, "  dtype: {:?},", T::DTYPE)?;
        writeln!(f, "  vector_size: {:?},", self.vector_size)?;

        writeln!(f, "  kernels: [")?;
        for kernel in self.kernels() {
            let node = &self[kernel];
            writeln!(
                f,
                "    {:?} = '{}' {{ arity: {}, vector_size: {:?}, executions: {}, dirty: {} }}",
                kernel,
                node.id(),
                node.arity(),
                node.vector_size(),
                node.execution_count(),
                node.is_dirty(),
            )?;

            for (position, value) in node.bindings() {
                match value {
                    BoundValue::Scalar(scalar) => writeln!(f, "      {}: {:?}", position, scalar)?,
                    BoundValue::Buffer { buffer, len } => writeln!(f, "      {}: Buffer({}) {:?}", position, len, buffer)?,
                    BoundValue::Promise(promise) => writeln!(
                        f,
                        "      {}: Promise('{}'[{}])",
                        position,
                        self[promise.source].id(),
                        promise.source_position
                    )?,
                }
            }
        }
        writeln!(f, "  ],")?;

        writeln!(f, "}}")?;
        Ok(())
    }
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Kernel { index, check } = self;
        if f.alternate() {
            write!(f, "Kernel {{ index: {}, check: {} }}", index, check)
        } else {
            write!(f, "Kernel({})", index)
        }
    }
}
