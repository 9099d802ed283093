#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! A host (CPU) [Device](kl_graph::device::Device) for [KernelGraph](kl_graph::graph::KernelGraph).
//!
//! Kernels are implemented in Rust and registered on the device by entry point name.
//! OpenCL C source passed to the device is scanned for the matching `__kernel` declaration,
//! so the same kernel directory can describe kernels for both the host and a real OpenCL device.
//!
//! ```
//! # use kl_graph::graph::KernelGraph;
//! # use kl_host::HostDevice;
//! let mut graph: KernelGraph<HostDevice, f32> = KernelGraph::new(HostDevice::with_builtins::<f32>());
//!
//! let square = graph.load("square").unwrap();
//! graph.bind_input(square, 0, &[1.0, 2.0, 3.0]).unwrap();
//! graph.bind_output(square, 1, None).unwrap();
//!
//! graph.evaluate("square").unwrap();
//! assert_eq!(graph.get_buffer(square, 1).unwrap(), vec![1.0, 4.0, 9.0]);
//! ```

pub use device::{HostBuffer, HostDevice, HostKernel};

pub mod builtin;
pub mod device;
pub mod launch;
pub mod signature;
