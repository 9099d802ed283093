use bytemuck::Pod;
use thiserror::Error;

use kl_graph::device::DeviceError;
use kl_graph::dtype::{bytes_to_elements, elements_to_bytes, Element};

/// The signature of a host kernel implementation.
pub type HostKernelFn = fn(&mut HostLaunch) -> Result<(), LaunchError>;

/// An error raised by a host kernel implementation while accessing its arguments.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum LaunchError {
    #[error("argument {position} does not exist, the kernel has {arity} arguments")]
    NoArgument { position: u32, arity: usize },
    #[error("argument {position} is a buffer, expected a scalar")]
    NotAScalar { position: u32 },
    #[error("argument {position} is a scalar, expected a buffer")]
    NotABuffer { position: u32 },
    #[error("scalar argument {position} has {actual} bytes, expected {expected}")]
    ScalarSize { position: u32, expected: usize, actual: usize },
    #[error("buffer argument {position} has {len} elements, fewer than the work size {work_size}")]
    TooShort { position: u32, len: usize, work_size: usize },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug)]
pub(crate) enum HostArg {
    Scalar(Vec<u8>),
    Buffer { slot: usize, data: Vec<u8>, written: bool },
}

/// The arguments of a single host kernel launch.
///
/// Buffers are copied in before the kernel runs, outputs are copied back to the device afterwards,
/// so a failing kernel leaves device memory untouched.
#[derive(Debug)]
pub struct HostLaunch {
    work_size: usize,
    args: Vec<HostArg>,
}

impl HostLaunch {
    pub(crate) fn new(work_size: usize, args: Vec<HostArg>) -> Self {
        HostLaunch { work_size, args }
    }

    /// The number of work items, every kernel computes elements `0..work_size`.
    pub fn work_size(&self) -> usize {
        self.work_size
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn scalar<S: Pod>(&self, position: u32) -> Result<S, LaunchError> {
        match self.arg(position)? {
            HostArg::Scalar(bytes) => {
                let expected = std::mem::size_of::<S>();
                if bytes.len() != expected {
                    return Err(LaunchError::ScalarSize {
                        position,
                        expected,
                        actual: bytes.len(),
                    });
                }
                Ok(bytemuck::pod_read_unaligned(bytes))
            }
            HostArg::Buffer { .. } => Err(LaunchError::NotAScalar { position }),
        }
    }

    /// The first `work_size` elements of the buffer at `position`.
    pub fn input<T: Element>(&self, position: u32) -> Result<Vec<T>, LaunchError> {
        let data = self.buffer(position)?;
        let mut values = bytes_to_elements::<T>(data);
        self.check_len(position, values.len())?;
        values.truncate(self.work_size);
        Ok(values)
    }

    /// Overwrite the start of the buffer at `position` with `values`.
    pub fn output<T: Element>(&mut self, position: u32, values: &[T]) -> Result<(), LaunchError> {
        let capacity = self.buffer(position)?.len() / std::mem::size_of::<T>();
        self.check_len(position, capacity)?;

        let bytes = elements_to_bytes(&values[..values.len().min(capacity)]);
        match &mut self.args[position as usize] {
            HostArg::Buffer { data, written, .. } => {
                data[..bytes.len()].copy_from_slice(bytes);
                *written = true;
                Ok(())
            }
            HostArg::Scalar(_) => Err(LaunchError::NotABuffer { position }),
        }
    }

    /// The buffers written by the kernel, as `(slot, contents)`.
    pub(crate) fn into_written(self) -> impl Iterator<Item = (usize, Vec<u8>)> {
        self.args.into_iter().filter_map(|arg| match arg {
            HostArg::Buffer {
                slot,
                data,
                written: true,
            } => Some((slot, data)),
            _ => None,
        })
    }

    fn arg(&self, position: u32) -> Result<&HostArg, LaunchError> {
        self.args.get(position as usize).ok_or(LaunchError::NoArgument {
            position,
            arity: self.args.len(),
        })
    }

    fn buffer(&self, position: u32) -> Result<&[u8], LaunchError> {
        match self.arg(position)? {
            HostArg::Buffer { data, .. } => Ok(data),
            HostArg::Scalar(_) => Err(LaunchError::NotABuffer { position }),
        }
    }

    fn check_len(&self, position: u32, len: usize) -> Result<(), LaunchError> {
        if len < self.work_size {
            Err(LaunchError::TooShort {
                position,
                len,
                work_size: self.work_size,
            })
        } else {
            Ok(())
        }
    }
}

impl From<LaunchError> for DeviceError {
    fn from(error: LaunchError) -> Self {
        let reason = error.to_string();
        match error {
            LaunchError::NoArgument { position, .. }
            | LaunchError::NotAScalar { position }
            | LaunchError::NotABuffer { position }
            | LaunchError::ScalarSize { position, .. }
            | LaunchError::TooShort { position, .. } => DeviceError::InvalidArgument { position, reason },
            LaunchError::Other(message) => DeviceError::Launch(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch() -> HostLaunch {
        let input = elements_to_bytes(&[1.0f32, 2.0, 3.0, 4.0]).to_vec();
        HostLaunch::new(
            3,
            vec![
                HostArg::Buffer {
                    slot: 7,
                    data: input,
                    written: false,
                },
                HostArg::Scalar(2.5f32.to_ne_bytes().to_vec()),
                HostArg::Buffer {
                    slot: 8,
                    data: vec![0; 8],
                    written: false,
                },
            ],
        )
    }

    #[test]
    fn accessors() {
        let mut launch = launch();
        assert_eq!(launch.input::<f32>(0).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(launch.scalar::<f32>(1).unwrap(), 2.5);

        assert_eq!(launch.scalar::<f64>(1), Err(LaunchError::ScalarSize { position: 1, expected: 8, actual: 4 }));
        assert_eq!(launch.scalar::<f32>(0), Err(LaunchError::NotAScalar { position: 0 }));
        assert_eq!(launch.input::<f32>(1), Err(LaunchError::NotABuffer { position: 1 }));
        assert_eq!(launch.input::<f32>(3), Err(LaunchError::NoArgument { position: 3, arity: 3 }));

        // two floats don't cover a work size of 3
        assert_eq!(
            launch.output(2, &[1.0f32, 2.0, 3.0]),
            Err(LaunchError::TooShort { position: 2, len: 2, work_size: 3 })
        );
        assert_eq!(launch.into_written().count(), 0);
    }

    #[test]
    fn only_written_buffers_are_returned() {
        let mut launch = launch();
        launch.output(0, &[9.0f32, 8.0, 7.0]).unwrap();

        let written = launch.into_written().collect::<Vec<_>>();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, 7);
        assert_eq!(bytes_to_elements::<f32>(&written[0].1), vec![9.0, 8.0, 7.0, 4.0]);
    }

    #[test]
    fn error_conversion() {
        let error = DeviceError::from(LaunchError::NotABuffer { position: 4 });
        assert!(matches!(error, DeviceError::InvalidArgument { position: 4, .. }));

        let error = DeviceError::from(LaunchError::Other("boom".to_owned()));
        assert_eq!(error, DeviceError::Launch("boom".to_owned()));
    }
}
