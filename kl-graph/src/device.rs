//! The collaborators a [KernelGraph](crate::graph::KernelGraph) needs from a device.
//!
//! A device is split into three capabilities, bundled by the [Device] trait:
//! * [BufferStore]: allocate, write, read and release device memory
//! * [KernelCompiler]: turn kernel source text into an executable kernel handle
//! * [DeviceExecutor]: run a kernel with a set of bound arguments, blocking until completion
//!
//! Buffer and kernel handles are owned values without `Clone`:
//! releasing a buffer consumes its handle, so a released buffer can't be used again.

use std::fmt::{Debug, Display, Formatter};

use thiserror::Error;

/// An error reported by a device collaborator.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DeviceError {
    #[error("failed to allocate {len_bytes} bytes: {reason}")]
    Allocation { len_bytes: usize, reason: String },
    #[error("buffer access of {len_bytes} bytes out of bounds for buffer of {capacity} bytes")]
    OutOfBounds { len_bytes: usize, capacity: usize },
    #[error("invalid argument at position {position}: {reason}")]
    InvalidArgument { position: u32, reason: String },
    #[error("expected {expected} kernel arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
    #[error("kernel launch failed: {0}")]
    Launch(String),
}

/// A failed compilation, with the compiler output.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("failed to compile entry point '{entry}': {log}")]
pub struct CompileError {
    pub entry: String,
    pub source_text: String,
    pub log: String,
}

/// A successful compilation. The log may still contain warnings.
#[derive(Debug)]
pub struct Compiled<K> {
    pub kernel: K,
    pub log: String,
}

/// One argument passed to a kernel launch.
#[derive(Debug)]
pub enum LaunchArg<'a, B> {
    Scalar(&'a [u8]),
    Buffer(&'a B),
}

/// Human readable information about a device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceProperties {
    pub name: String,
    pub version: String,
    pub driver_version: String,
    pub language_version: String,
    pub compute_units: u32,
}

pub trait BufferStore {
    type Buffer: Debug;

    fn allocate(&mut self, len_bytes: usize) -> Result<Self::Buffer, DeviceError>;

    fn write(&mut self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), DeviceError>;

    /// Read the first `len_bytes` bytes of `buffer` back to the host.
    fn read(&self, buffer: &Self::Buffer, len_bytes: usize) -> Result<Vec<u8>, DeviceError>;

    fn release(&mut self, buffer: Self::Buffer);
}

pub trait KernelCompiler {
    type Kernel: Debug;

    /// Compile `source` and extract the kernel with the given entry point name.
    fn compile(&mut self, source: &str, entry: &str) -> Result<Compiled<Self::Kernel>, CompileError>;

    /// The number of arguments `kernel` declares.
    fn arity(&self, kernel: &Self::Kernel) -> usize;

    fn release_kernel(&mut self, kernel: Self::Kernel);
}

pub trait DeviceExecutor: BufferStore + KernelCompiler {
    /// Launch `kernel` over `work_size` work items and block until it has completed.
    ///
    /// `args` contains exactly one entry per kernel argument, in position order.
    fn execute(
        &mut self,
        kernel: &Self::Kernel,
        args: &[LaunchArg<Self::Buffer>],
        work_size: usize,
    ) -> Result<(), DeviceError>;
}

/// A full device, able to store buffers, compile kernels and run them.
pub trait Device: DeviceExecutor {
    fn properties(&self) -> DeviceProperties;
}

impl Display for DeviceProperties {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Device: {}", self.name)?;
        writeln!(f, "Hardware version: {}", self.version)?;
        writeln!(f, "Software version: {}", self.driver_version)?;
        writeln!(f, "Kernel language version: {}", self.language_version)?;
        write!(f, "Parallel compute units: {}", self.compute_units)
    }
}
