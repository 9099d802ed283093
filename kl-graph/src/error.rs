use std::io;
use std::path::PathBuf;

use itertools::Itertools;
use thiserror::Error;

use crate::device::{CompileError, DeviceError};

pub type GraphResult<T> = Result<T, GraphError>;

/// The broad category of a [GraphError].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The graph was set up wrong: unknown or duplicate identifiers, no way to determine a size, ...
    Configuration,
    /// The argument bindings of a kernel are incomplete or inconsistent.
    Binding,
    /// The device failed to compile, allocate or run something.
    Execution,
    /// A buffer could not be read back.
    Retrieval,
    /// Promises form a cycle.
    Cycle,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("kernel identifier '{id}' already exists")]
    DuplicateKernel { id: String },
    #[error("no kernel with identifier '{id}' exists")]
    UnknownKernel { id: String },
    #[error("cannot read source for kernel '{id}' from {path:?}")]
    SourceUnavailable {
        id: String,
        path: PathBuf,
        #[source]
        error: io::Error,
    },
    #[error("cannot determine the element count of output {position} of kernel '{id}': pass an explicit size or bind an input first")]
    UndeterminedSize { id: String, position: u32 },
    #[error("cannot determine the work size of kernel '{id}': neither the kernel nor the graph has an element count")]
    UndeterminedWorkSize { id: String },
    #[error("invalid scalar for position {position} of kernel '{id}': {reason}")]
    InvalidScalar { id: String, position: u32, reason: String },

    #[error("kernel '{id}' has {bound} of {arity} arguments bound, {} missing: positions [{}]", .missing.len(), .missing.iter().join(", "))]
    IncompleteArguments {
        id: String,
        arity: usize,
        bound: usize,
        missing: Vec<u32>,
    },
    #[error("position {position} is out of range for kernel '{id}' with {arity} arguments")]
    PositionOutOfRange { id: String, position: u32, arity: usize },
    #[error("input at position {position} of kernel '{id}' has length {actual}, but the kernel already has element count {expected}")]
    SizeMismatch {
        id: String,
        position: u32,
        expected: usize,
        actual: usize,
    },
    #[error("promise at position {position} of kernel '{id}' refers to position {source_position} of kernel '{source_id}', which holds {found}")]
    UnresolvedPromise {
        id: String,
        position: u32,
        source_id: String,
        source_position: u32,
        found: &'static str,
    },

    #[error("failed to compile kernel '{id}'")]
    Compile {
        id: String,
        #[source]
        error: CompileError,
    },
    #[error("device error for position {position} of kernel '{id}'")]
    Device {
        id: String,
        position: u32,
        #[source]
        error: DeviceError,
    },
    #[error("failed to execute kernel '{id}'")]
    Execution {
        id: String,
        #[source]
        error: DeviceError,
    },

    #[error("nothing is bound at position {position} of kernel '{id}'")]
    Unbound { id: String, position: u32 },
    #[error("position {position} of kernel '{id}' is promised by kernel '{source_id}', which has never executed")]
    NotExecuted {
        id: String,
        position: u32,
        source_id: String,
    },
    #[error("scalar at position {position} of kernel '{id}' has {scalar_bytes} bytes, elements have {element_bytes}")]
    ScalarSize {
        id: String,
        position: u32,
        scalar_bytes: usize,
        element_bytes: usize,
    },
    #[error("failed to read position {position} of kernel '{id}'")]
    Read {
        id: String,
        position: u32,
        #[source]
        error: DeviceError,
    },

    #[error("promises form a cycle: {}", .path.iter().join(" -> "))]
    Cycle { path: Vec<String> },
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::DuplicateKernel { .. }
            | GraphError::UnknownKernel { .. }
            | GraphError::SourceUnavailable { .. }
            | GraphError::UndeterminedSize { .. }
            | GraphError::UndeterminedWorkSize { .. }
            | GraphError::InvalidScalar { .. } => ErrorKind::Configuration,

            GraphError::IncompleteArguments { .. }
            | GraphError::PositionOutOfRange { .. }
            | GraphError::SizeMismatch { .. }
            | GraphError::UnresolvedPromise { .. } => ErrorKind::Binding,

            GraphError::Compile { .. } | GraphError::Device { .. } | GraphError::Execution { .. } => {
                ErrorKind::Execution
            }

            GraphError::Unbound { .. }
            | GraphError::NotExecuted { .. }
            | GraphError::ScalarSize { .. }
            | GraphError::Read { .. } => ErrorKind::Retrieval,

            GraphError::Cycle { .. } => ErrorKind::Cycle,
        }
    }

    /// The identifier of the kernel this error is about, if there is a single one.
    pub fn kernel_id(&self) -> Option<&str> {
        match self {
            GraphError::DuplicateKernel { id }
            | GraphError::UnknownKernel { id }
            | GraphError::SourceUnavailable { id, .. }
            | GraphError::UndeterminedSize { id, .. }
            | GraphError::UndeterminedWorkSize { id }
            | GraphError::InvalidScalar { id, .. }
            | GraphError::IncompleteArguments { id, .. }
            | GraphError::PositionOutOfRange { id, .. }
            | GraphError::SizeMismatch { id, .. }
            | GraphError::UnresolvedPromise { id, .. }
            | GraphError::Compile { id, .. }
            | GraphError::Device { id, .. }
            | GraphError::Execution { id, .. }
            | GraphError::Unbound { id, .. }
            | GraphError::NotExecuted { id, .. }
            | GraphError::ScalarSize { id, .. }
            | GraphError::Read { id, .. } => Some(id),
            GraphError::Cycle { .. } => None,
        }
    }
}
