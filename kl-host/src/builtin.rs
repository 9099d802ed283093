//! Host implementations of a few elementwise kernels.
//!
//! | kernel   | arguments                        | computes                 |
//! |----------|----------------------------------|--------------------------|
//! | `square` | `input, output`                  | `output = input * input` |
//! | `add`    | `left, right, output`            | `output = left + right`  |
//! | `sub`    | `left, right, output`            | `output = left - right`  |
//! | `mul`    | `left, right, output`            | `output = left * right`  |
//! | `scale`  | `input, factor (scalar), output` | `output = input * factor`|
//! | `copy`   | `input, output`                  | `output = input`         |
//! | `fill`   | `value (scalar), output`         | `output = value`         |
//!
//! Matching OpenCL C declarations for `float` are in the `kernels` directory of this crate.

use itertools::izip;
use num_traits::Num;

use kl_graph::dtype::Element;

use crate::device::HostDevice;
use crate::launch::{HostLaunch, LaunchError};

/// Register all builtin kernels for element type `T`.
pub fn register_builtins<T: Element + Num>(device: &mut HostDevice) {
    device.register("square", 2, square::<T>);
    device.register("add", 3, binary::<T, Add>);
    device.register("sub", 3, binary::<T, Sub>);
    device.register("mul", 3, binary::<T, Mul>);
    device.register("scale", 3, scale::<T>);
    device.register("copy", 2, copy::<T>);
    device.register("fill", 2, fill::<T>);
}

impl HostDevice {
    /// A device with the [builtin kernels](crate::builtin) for element type `T` registered.
    pub fn with_builtins<T: Element + Num>() -> Self {
        let mut device = HostDevice::new();
        register_builtins::<T>(&mut device);
        device
    }
}

trait BinaryOp {
    fn apply<T: Num>(left: T, right: T) -> T;
}

struct Add;
struct Sub;
struct Mul;

impl BinaryOp for Add {
    fn apply<T: Num>(left: T, right: T) -> T {
        left + right
    }
}

impl BinaryOp for Sub {
    fn apply<T: Num>(left: T, right: T) -> T {
        left - right
    }
}

impl BinaryOp for Mul {
    fn apply<T: Num>(left: T, right: T) -> T {
        left * right
    }
}

fn square<T: Element + Num>(launch: &mut HostLaunch) -> Result<(), LaunchError> {
    let input = launch.input::<T>(0)?;
    let output: Vec<T> = input.iter().map(|&x| x * x).collect();
    launch.output(1, &output)
}

fn binary<T: Element + Num, O: BinaryOp>(launch: &mut HostLaunch) -> Result<(), LaunchError> {
    let left = launch.input::<T>(0)?;
    let right = launch.input::<T>(1)?;
    let output: Vec<T> = izip!(left, right).map(|(l, r)| O::apply(l, r)).collect();
    launch.output(2, &output)
}

fn scale<T: Element + Num>(launch: &mut HostLaunch) -> Result<(), LaunchError> {
    let input = launch.input::<T>(0)?;
    let factor = launch.scalar::<T>(1)?;
    let output: Vec<T> = input.iter().map(|&x| x * factor).collect();
    launch.output(2, &output)
}

fn copy<T: Element + Num>(launch: &mut HostLaunch) -> Result<(), LaunchError> {
    let input = launch.input::<T>(0)?;
    launch.output(1, &input)
}

fn fill<T: Element + Num>(launch: &mut HostLaunch) -> Result<(), LaunchError> {
    let value = launch.scalar::<T>(0)?;
    let output = vec![value; launch.work_size()];
    launch.output(1, &output)
}

#[cfg(test)]
mod tests {
    use kl_graph::device::{BufferStore, DeviceExecutor, KernelCompiler, LaunchArg};
    use kl_graph::dtype::{bytes_to_elements, elements_to_bytes};

    use super::*;

    fn run_binary(entry: &str, left: &[i32], right: &[i32]) -> Vec<i32> {
        let mut device = HostDevice::with_builtins::<i32>();
        let kernel = device.compile("", entry).unwrap().kernel;

        let zeros = vec![0; left.len()];
        let inputs: [&[i32]; 3] = [left, right, &zeros];
        let bufs = inputs
            .into_iter()
            .map(|data| {
                let buffer = device.allocate(data.len() * 4).unwrap();
                device.write(&buffer, elements_to_bytes(data)).unwrap();
                buffer
            })
            .collect::<Vec<_>>();

        let args = bufs.iter().map(LaunchArg::Buffer).collect::<Vec<_>>();
        device.execute(&kernel, &args, left.len()).unwrap();
        bytes_to_elements(&device.read(&bufs[2], left.len() * 4).unwrap())
    }

    #[test]
    fn binary_ops() {
        assert_eq!(run_binary("add", &[1, 2, 3], &[10, 20, 30]), vec![11, 22, 33]);
        assert_eq!(run_binary("sub", &[1, 2, 3], &[10, 20, 30]), vec![-9, -18, -27]);
        assert_eq!(run_binary("mul", &[1, 2, 3], &[10, 20, 30]), vec![10, 40, 90]);
    }

    #[test]
    fn fill_and_scale() {
        let mut device = HostDevice::with_builtins::<f64>();
        let fill = device.compile("", "fill").unwrap().kernel;
        let scale = device.compile("", "scale").unwrap().kernel;

        let a = device.allocate(3 * 8).unwrap();
        let b = device.allocate(3 * 8).unwrap();
        let value = 1.5f64.to_ne_bytes();
        let factor = 4.0f64.to_ne_bytes();

        device.execute(&fill, &[LaunchArg::Scalar(&value), LaunchArg::Buffer(&a)], 3).unwrap();
        device
            .execute(&scale, &[LaunchArg::Buffer(&a), LaunchArg::Scalar(&factor), LaunchArg::Buffer(&b)], 3)
            .unwrap();

        assert_eq!(bytes_to_elements::<f64>(&device.read(&b, 24).unwrap()), vec![6.0; 3]);
        assert_eq!(device.launch_count(), 2);
    }

    #[test]
    fn failed_launch_leaves_outputs() {
        let mut device = HostDevice::with_builtins::<f32>();
        let scale = device.compile("", "scale").unwrap().kernel;

        let a = device.allocate(8).unwrap();
        let b = device.allocate(8).unwrap();
        device.write(&b, elements_to_bytes(&[7.0f32, 7.0])).unwrap();

        // a double instead of a float
        let factor = 2.0f64.to_ne_bytes();
        let err = device
            .execute(&scale, &[LaunchArg::Buffer(&a), LaunchArg::Scalar(&factor), LaunchArg::Buffer(&b)], 2)
            .unwrap_err();
        assert!(matches!(err, kl_graph::device::DeviceError::InvalidArgument { position: 1, .. }));

        assert_eq!(bytes_to_elements::<f32>(&device.read(&b, 8).unwrap()), vec![7.0, 7.0]);
        assert_eq!(device.launch_count(), 0);
    }
}
