#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! Compose independently compiled compute kernels into a lazily evaluated graph.
//!
//! The core type of this crate is [KernelGraph](graph::KernelGraph). Each kernel declares per argument position
//! whether it takes a literal scalar, an owned device buffer, or a *promise*: the output of another kernel in the graph.
//! Evaluating a kernel executes only the kernels it transitively depends on, each at most once,
//! and passes already produced buffers along without copying them back to the host.
//!
//! The graph does not know how to talk to hardware itself, instead it is generic over a [Device](device::Device)
//! that stores buffers, compiles kernels and runs them.
//!
//! ```no_run
//! # use kl_graph::device::Device;
//! # use kl_graph::graph::KernelGraph;
//! # use kl_graph::settings::{GraphSettings, KernelSource};
//! # fn main_with<D: Device>(device: D) -> Result<(), Box<dyn std::error::Error>> {
//! // read kernel sources from `kernels/<id>.cl`
//! let settings = GraphSettings {
//!     source: KernelSource::directory("kernels"),
//!     ..Default::default()
//! };
//! let mut graph: KernelGraph<D, f32> = KernelGraph::with_settings(device, settings);
//!
//! // square a vector
//! let square = graph.load("square")?;
//! graph.bind_input(square, 0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
//! graph.bind_output(square, 1, None)?;
//!
//! graph.evaluate("square")?;
//! graph.show_buffers(square)?;
//! # Ok(())
//! # }
//! ```
//!
//! This crate is part of the Kernlink project, see its readme for more information.

/// The bound value of a single argument position.
pub mod bound;
/// The device collaborator traits.
pub mod device;
/// Buffer element types.
pub mod dtype;
/// Error types.
pub mod error;
/// Lazy graph evaluation.
pub mod eval;
/// The kernel graph and its handles.
pub mod graph;
/// A single kernel and its argument table.
pub mod node;
/// Graph configuration.
pub mod settings;
/// Formatting utilities.
pub mod util;
