use std::fmt::{Debug, Display};

use bytemuck::Pod;

/// The element type of device buffers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DType {
    F32,
    F64,
    I(DSize),
    U(DSize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DSize {
    S8,
    S16,
    S32,
    S64,
}

impl DType {
    pub fn size(self) -> DSize {
        match self {
            DType::F32 => DSize::S32,
            DType::F64 => DSize::S64,
            DType::I(size) => size,
            DType::U(size) => size,
        }
    }

    pub fn is_signed(self) -> bool {
        match self {
            DType::F32 | DType::F64 => true,
            DType::I(_) => true,
            DType::U(_) => false,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// The name of the matching OpenCL C type.
    pub fn c_name(self) -> &'static str {
        match self {
            DType::F32 => "float",
            DType::F64 => "double",
            DType::I(DSize::S8) => "char",
            DType::I(DSize::S16) => "short",
            DType::I(DSize::S32) => "int",
            DType::I(DSize::S64) => "long",
            DType::U(DSize::S8) => "uchar",
            DType::U(DSize::S16) => "ushort",
            DType::U(DSize::S32) => "uint",
            DType::U(DSize::S64) => "ulong",
        }
    }
}

impl DSize {
    pub fn bytes(self) -> usize {
        match self {
            DSize::S8 => 1,
            DSize::S16 => 2,
            DSize::S32 => 4,
            DSize::S64 => 8,
        }
    }
}

/// A value type that can live in a device buffer.
///
/// Elements are plain bit-copyable data, so they can be moved between host and device as raw bytes.
pub trait Element: Pod + Debug + Display + PartialEq + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;
        }
    };
}

impl_element!(f32, DType::F32);
impl_element!(f64, DType::F64);
impl_element!(i8, DType::I(DSize::S8));
impl_element!(i16, DType::I(DSize::S16));
impl_element!(i32, DType::I(DSize::S32));
impl_element!(i64, DType::I(DSize::S64));
impl_element!(u8, DType::U(DSize::S8));
impl_element!(u16, DType::U(DSize::S16));
impl_element!(u32, DType::U(DSize::S32));
impl_element!(u64, DType::U(DSize::S64));

/// Convert a slice of elements to the bytes a device buffer expects.
pub fn elements_to_bytes<T: Element>(data: &[T]) -> &[u8] {
    bytemuck::cast_slice(data)
}

/// Convert bytes read back from a device buffer into elements.
///
/// The bytes do not need to be aligned for `T`; trailing bytes that don't form a full element are ignored.
pub fn bytes_to_elements<T: Element>(bytes: &[u8]) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect()
}
