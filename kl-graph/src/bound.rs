use std::fmt::{Debug, Formatter};

use bytemuck::Pod;

use crate::graph::Kernel;

/// The current binding of one kernel argument position.
///
/// A kernel keeps at most one of these per position, so rebinding a position replaces whatever was there.
#[derive(Debug)]
pub enum BoundValue<B> {
    /// A literal value, passed to the kernel by value.
    Scalar(Scalar),
    /// A device buffer owned by the kernel that bound it.
    Buffer { buffer: B, len: usize },
    /// A reference to a buffer owned by another kernel, which becomes valid once that kernel has executed.
    Promise(Promise),
}

/// The raw bytes of a scalar argument.
#[derive(Clone, Eq, PartialEq)]
pub struct Scalar {
    bytes: Vec<u8>,
    type_name: &'static str,
}

/// A non-owning edge from a position of one kernel to a position of another.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Promise {
    pub source: Kernel,
    pub source_position: u32,
    pub target_position: u32,
}

impl Scalar {
    /// Copy `value` bit for bit. Returns `None` for zero-sized types, which can't be passed as an argument.
    pub fn from_value<S: Pod>(value: S) -> Option<Scalar> {
        let bytes = bytemuck::bytes_of(&value).to_vec();
        if bytes.is_empty() {
            return None;
        }
        Some(Scalar {
            bytes,
            type_name: std::any::type_name::<S>(),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Option<Scalar> {
        if bytes.is_empty() {
            return None;
        }
        Some(Scalar {
            bytes,
            type_name: "bytes",
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Reinterpret the bytes as `S`, if the sizes match.
    pub fn read<S: Pod>(&self) -> Option<S> {
        if self.bytes.len() == std::mem::size_of::<S>() {
            Some(bytemuck::pod_read_unaligned(&self.bytes))
        } else {
            None
        }
    }
}

impl<B> BoundValue<B> {
    pub fn from_buffer(buffer: B, len: usize) -> Self {
        BoundValue::Buffer { buffer, len }
    }

    pub fn promise(source: Kernel, source_position: u32, target_position: u32) -> Self {
        BoundValue::Promise(Promise {
            source,
            source_position,
            target_position,
        })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, BoundValue::Scalar(_))
    }

    pub fn is_promise(&self) -> bool {
        matches!(self, BoundValue::Promise(_))
    }

    /// The element count of an owned buffer, `None` for scalars and promises.
    pub fn element_count(&self) -> Option<usize> {
        match *self {
            BoundValue::Buffer { len, .. } => Some(len),
            BoundValue::Scalar(_) | BoundValue::Promise(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&B> {
        match self {
            BoundValue::Buffer { buffer, .. } => Some(buffer),
            BoundValue::Scalar(_) | BoundValue::Promise(_) => None,
        }
    }

    /// The underlying device buffer.
    ///
    /// Panics when called on a scalar or a promise, asking for a buffer there is a bug in the caller.
    pub fn unwrap_buffer(&self) -> &B {
        match self {
            BoundValue::Buffer { buffer, .. } => buffer,
            BoundValue::Scalar(scalar) => panic!("Expected a buffer, got scalar {:?}", scalar),
            BoundValue::Promise(promise) => panic!("Expected a buffer, got unresolved {:?}", promise),
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            BoundValue::Promise(promise) => Some(promise),
            BoundValue::Scalar(_) | BoundValue::Buffer { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            BoundValue::Scalar(_) => "a scalar",
            BoundValue::Buffer { .. } => "a buffer",
            BoundValue::Promise(_) => "a promise",
        }
    }
}

impl Debug for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scalar({}, {:?})", self.type_name, self.bytes)
    }
}
