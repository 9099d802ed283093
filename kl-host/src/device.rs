use std::fmt::{Debug, Formatter};

use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;

use kl_graph::device::{
    BufferStore, CompileError, Compiled, Device, DeviceError, DeviceExecutor, DeviceProperties, KernelCompiler,
    LaunchArg,
};

use crate::launch::{HostArg, HostKernelFn, HostLaunch};
use crate::signature::scan_kernels;

/// A device that runs kernels on the host, using Rust implementations registered by name.
///
/// Source text passed to [KernelCompiler::compile] is only scanned for `__kernel` declarations,
/// to check that it declares the requested entry point with the arity of the registered implementation.
/// An empty source skips this check.
#[derive(Debug)]
pub struct HostDevice {
    registry: IndexMap<String, Registered>,

    buffers: Vec<Option<Vec<u8>>>,
    free_slots: Vec<usize>,
    allocated_bytes: usize,
    memory_limit: Option<usize>,

    live_kernels: usize,
    launch_count: u64,
}

#[derive(Copy, Clone)]
struct Registered {
    arity: usize,
    run: HostKernelFn,
}

/// A buffer in host memory owned by a [HostDevice].
#[derive(Debug, Eq, PartialEq, Hash)]
pub struct HostBuffer(usize);

/// A kernel compiled by a [HostDevice].
pub struct HostKernel {
    name: String,
    arity: usize,
    run: HostKernelFn,
}

impl HostDevice {
    /// A device without any kernels, see [Self::register].
    pub fn new() -> Self {
        HostDevice {
            registry: IndexMap::new(),
            buffers: vec![],
            free_slots: vec![],
            allocated_bytes: 0,
            memory_limit: None,
            live_kernels: 0,
            launch_count: 0,
        }
    }

    /// Make allocations fail once more than `bytes` bytes would be live.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Register the host implementation of the kernel `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, arity: usize, run: HostKernelFn) {
        debug!("Registering host kernel '{}' with {} arguments", name, arity);
        self.registry.insert(name.to_owned(), Registered { arity, run });
    }

    /// Register the implementation of `existing` under the additional name `name`,
    /// so the same kernel can be loaded into a graph multiple times.
    /// Returns false if `existing` is not registered.
    pub fn alias(&mut self, name: &str, existing: &str) -> bool {
        match self.registry.get(existing).copied() {
            Some(registered) => {
                self.registry.insert(name.to_owned(), registered);
                true
            }
            None => false,
        }
    }

    /// The registered kernels as `(name, arity)`, in registration order.
    pub fn kernels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.registry.iter().map(|(name, reg)| (name.as_str(), reg.arity))
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    pub fn live_kernels(&self) -> usize {
        self.live_kernels
    }

    /// The number of successful kernel launches so far.
    pub fn launch_count(&self) -> u64 {
        self.launch_count
    }

    fn slot(&self, buffer: &HostBuffer) -> Result<&Vec<u8>, DeviceError> {
        self.buffers
            .get(buffer.0)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| DeviceError::Launch(format!("{:?} is not a live buffer of this device", buffer)))
    }
}

impl HostKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for HostKernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostKernel({}, arity {})", self.name, self.arity)
    }
}

impl Debug for Registered {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registered(arity {})", self.arity)
    }
}

impl BufferStore for HostDevice {
    type Buffer = HostBuffer;

    fn allocate(&mut self, len_bytes: usize) -> Result<HostBuffer, DeviceError> {
        let error = |reason: String| DeviceError::Allocation { len_bytes, reason };

        let total = self
            .allocated_bytes
            .checked_add(len_bytes)
            .ok_or_else(|| error("total allocation size overflows".to_owned()))?;
        if let Some(limit) = self.memory_limit {
            if total > limit {
                return Err(error(format!("{} of {} bytes already allocated", self.allocated_bytes, limit)));
            }
        }

        let mut data = Vec::new();
        data.try_reserve_exact(len_bytes).map_err(|e| error(e.to_string()))?;
        data.resize(len_bytes, 0);
        let data = Some(data);
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.buffers[index] = data;
                index
            }
            None => {
                self.buffers.push(data);
                self.buffers.len() - 1
            }
        };

        self.allocated_bytes += len_bytes;
        Ok(HostBuffer(index))
    }

    fn write(&mut self, buffer: &HostBuffer, data: &[u8]) -> Result<(), DeviceError> {
        let capacity = self.slot(buffer)?.len();
        if data.len() > capacity {
            return Err(DeviceError::OutOfBounds {
                len_bytes: data.len(),
                capacity,
            });
        }

        if let Some(slot) = &mut self.buffers[buffer.0] {
            slot[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn read(&self, buffer: &HostBuffer, len_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        let slot = self.slot(buffer)?;
        slot.get(..len_bytes).map(|bytes| bytes.to_vec()).ok_or(DeviceError::OutOfBounds {
            len_bytes,
            capacity: slot.len(),
        })
    }

    fn release(&mut self, buffer: HostBuffer) {
        if let Some(data) = self.buffers.get_mut(buffer.0).and_then(|slot| slot.take()) {
            self.allocated_bytes -= data.len();
            self.free_slots.push(buffer.0);
        }
    }
}

impl KernelCompiler for HostDevice {
    type Kernel = HostKernel;

    fn compile(&mut self, source: &str, entry: &str) -> Result<Compiled<HostKernel>, CompileError> {
        let error = |log: String| CompileError {
            entry: entry.to_owned(),
            source_text: source.to_owned(),
            log,
        };

        let registered = *self
            .registry
            .get(entry)
            .ok_or_else(|| error(format!("no host implementation registered for '{}'", entry)))?;

        let mut log = String::new();
        if !source.is_empty() {
            let declared = scan_kernels(source).map_err(|e| error(format!("error: {}", e)))?;
            let signature = declared
                .iter()
                .find(|k| k.name == entry)
                .ok_or_else(|| error(format!("error: source does not declare kernel '{}'", entry)))?;

            if signature.arity() != registered.arity {
                return Err(error(format!(
                    "error: line {}: kernel '{}' declares {} parameters, the host implementation takes {}",
                    signature.line,
                    entry,
                    signature.arity(),
                    registered.arity
                )));
            }

            let others = declared.iter().filter(|k| k.name != entry).map(|k| &k.name).collect_vec();
            if !others.is_empty() {
                log = format!("warning: ignoring other kernels in source: {}", others.iter().join(", "));
            }
        }

        self.live_kernels += 1;
        Ok(Compiled {
            kernel: HostKernel {
                name: entry.to_owned(),
                arity: registered.arity,
                run: registered.run,
            },
            log,
        })
    }

    fn arity(&self, kernel: &HostKernel) -> usize {
        kernel.arity
    }

    fn release_kernel(&mut self, _: HostKernel) {
        self.live_kernels -= 1;
    }
}

impl DeviceExecutor for HostDevice {
    fn execute(&mut self, kernel: &HostKernel, args: &[LaunchArg<HostBuffer>], work_size: usize) -> Result<(), DeviceError> {
        if args.len() != kernel.arity {
            return Err(DeviceError::ArgumentCount {
                expected: kernel.arity,
                actual: args.len(),
            });
        }

        let args = args
            .iter()
            .map(|arg| -> Result<HostArg, DeviceError> {
                Ok(match arg {
                    LaunchArg::Scalar(bytes) => HostArg::Scalar(bytes.to_vec()),
                    LaunchArg::Buffer(buffer) => HostArg::Buffer {
                        slot: buffer.0,
                        data: self.slot(buffer)?.clone(),
                        written: false,
                    },
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        let mut launch = HostLaunch::new(work_size, args);
        (kernel.run)(&mut launch)?;

        for (slot, data) in launch.into_written() {
            self.buffers[slot] = Some(data);
        }
        self.launch_count += 1;
        Ok(())
    }
}

impl Device for HostDevice {
    fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            name: format!("host ({})", std::env::consts::ARCH),
            version: std::env::consts::OS.to_owned(),
            driver_version: format!("kl-host {}", env!("CARGO_PKG_VERSION")),
            language_version: "OpenCL C declarations, host implementations".to_owned(),
            compute_units: std::thread::available_parallelism().map_or(1, |n| n.get() as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_reused() {
        let mut device = HostDevice::new();
        let a = device.allocate(8).unwrap();
        let b = device.allocate(4).unwrap();
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(device.allocated_bytes(), 12);

        device.release(a);
        let c = device.allocate(16).unwrap();
        assert_eq!(c, HostBuffer(0));
        assert_eq!(device.allocated_bytes(), 20);

        device.release(b);
        device.release(c);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn bounds_and_limits() {
        let mut device = HostDevice::new().with_memory_limit(10);
        let a = device.allocate(8).unwrap();

        assert!(matches!(device.allocate(4), Err(DeviceError::Allocation { len_bytes: 4, .. })));
        assert_eq!(
            device.write(&a, &[0; 9]),
            Err(DeviceError::OutOfBounds {
                len_bytes: 9,
                capacity: 8
            })
        );
        assert!(device.read(&a, 9).is_err());

        device.write(&a, &[1, 2, 3]).unwrap();
        assert_eq!(device.read(&a, 4).unwrap(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn oversized_allocation_fails() {
        let mut device = HostDevice::new();
        assert!(matches!(device.allocate(usize::MAX), Err(DeviceError::Allocation { .. })));
        assert_eq!(device.live_buffers(), 0);

        let mut device = HostDevice::new().with_memory_limit(usize::MAX);
        let _a = device.allocate(8).unwrap();
        assert!(matches!(device.allocate(usize::MAX), Err(DeviceError::Allocation { .. })));
        assert_eq!(device.allocated_bytes(), 8);
    }

    fn noop(_: &mut HostLaunch) -> Result<(), crate::launch::LaunchError> {
        Ok(())
    }

    #[test]
    fn compile_checks_declaration() {
        let mut device = HostDevice::new();
        device.register("f", 2, noop);

        assert!(device.compile("", "f").is_ok());
        assert!(device.compile("", "g").is_err());

        let compiled = device.compile("__kernel void f(int a, int b) {}", "f").unwrap();
        assert!(compiled.log.is_empty());
        assert_eq!(device.arity(&compiled.kernel), 2);

        let err = device.compile("__kernel void f(int a) {}", "f").unwrap_err();
        assert!(err.log.contains("declares 1 parameters"), "{}", err.log);

        let err = device.compile("__kernel void h(int a) {}", "f").unwrap_err();
        assert_eq!(err.source_text, "__kernel void h(int a) {}");

        let compiled = device
            .compile("__kernel void f(int a, int b) {}\n__kernel void h() {}", "f")
            .unwrap();
        assert!(compiled.log.ends_with("source: h"), "{}", compiled.log);
        assert_eq!(device.live_kernels(), 3);
    }
}
