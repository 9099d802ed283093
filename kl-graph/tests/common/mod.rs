use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use kl_graph::device::{
    BufferStore, CompileError, Compiled, Device, DeviceError, DeviceExecutor, DeviceProperties, KernelCompiler,
    LaunchArg,
};

/// A device that only records what happens to it.
#[derive(Debug)]
pub struct MockDevice {
    arities: HashMap<String, usize>,
    buffers: Vec<Option<Vec<u8>>>,
    pub stats: Rc<RefCell<MockStats>>,
    pub fail_next_launch: bool,
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub launches: Vec<Launch>,
    pub live_buffers: usize,
    pub live_kernels: usize,
    pub property_queries: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Launch {
    pub entry: String,
    pub work_size: usize,
    pub args: Vec<MockArg>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MockArg {
    Scalar(Vec<u8>),
    Buffer(usize),
}

#[derive(Debug)]
pub struct MockBuffer(pub usize);

#[derive(Debug)]
pub struct MockKernel {
    entry: String,
    arity: usize,
}

impl MockDevice {
    pub fn new(kernels: &[(&str, usize)]) -> Self {
        MockDevice {
            arities: kernels.iter().map(|&(name, arity)| (name.to_owned(), arity)).collect(),
            buffers: vec![],
            stats: Default::default(),
            fail_next_launch: false,
        }
    }
}

impl MockStats {
    pub fn launched(&self) -> Vec<&str> {
        self.launches.iter().map(|l| l.entry.as_str()).collect()
    }

    pub fn launch_count(&self, entry: &str) -> usize {
        self.launches.iter().filter(|l| l.entry == entry).count()
    }
}

impl BufferStore for MockDevice {
    type Buffer = MockBuffer;

    fn allocate(&mut self, len_bytes: usize) -> Result<MockBuffer, DeviceError> {
        self.buffers.push(Some(vec![0; len_bytes]));
        self.stats.borrow_mut().live_buffers += 1;
        Ok(MockBuffer(self.buffers.len() - 1))
    }

    fn write(&mut self, buffer: &MockBuffer, data: &[u8]) -> Result<(), DeviceError> {
        let slot = self.buffers[buffer.0].as_mut().expect("write to released buffer");
        slot[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, buffer: &MockBuffer, len_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        let slot = self.buffers[buffer.0].as_ref().expect("read from released buffer");
        Ok(slot[..len_bytes].to_vec())
    }

    fn release(&mut self, buffer: MockBuffer) {
        assert!(self.buffers[buffer.0].take().is_some(), "double release");
        self.stats.borrow_mut().live_buffers -= 1;
    }
}

impl KernelCompiler for MockDevice {
    type Kernel = MockKernel;

    fn compile(&mut self, source: &str, entry: &str) -> Result<Compiled<MockKernel>, CompileError> {
        let error = |log: &str| CompileError {
            entry: entry.to_owned(),
            source_text: source.to_owned(),
            log: log.to_owned(),
        };

        if !source.is_empty() && !source.contains(entry) {
            return Err(error("entry point not found in source"));
        }
        let &arity = self.arities.get(entry).ok_or_else(|| error("unknown kernel"))?;

        self.stats.borrow_mut().live_kernels += 1;
        Ok(Compiled {
            kernel: MockKernel {
                entry: entry.to_owned(),
                arity,
            },
            log: String::new(),
        })
    }

    fn arity(&self, kernel: &MockKernel) -> usize {
        kernel.arity
    }

    fn release_kernel(&mut self, _: MockKernel) {
        self.stats.borrow_mut().live_kernels -= 1;
    }
}

impl DeviceExecutor for MockDevice {
    fn execute(
        &mut self,
        kernel: &MockKernel,
        args: &[LaunchArg<MockBuffer>],
        work_size: usize,
    ) -> Result<(), DeviceError> {
        if self.fail_next_launch {
            self.fail_next_launch = false;
            return Err(DeviceError::Launch("injected failure".to_owned()));
        }

        let args = args
            .iter()
            .map(|arg| match arg {
                LaunchArg::Scalar(bytes) => MockArg::Scalar(bytes.to_vec()),
                LaunchArg::Buffer(buffer) => MockArg::Buffer(buffer.0),
            })
            .collect();

        self.stats.borrow_mut().launches.push(Launch {
            entry: kernel.entry.clone(),
            work_size,
            args,
        });
        Ok(())
    }
}

impl Device for MockDevice {
    fn properties(&self) -> DeviceProperties {
        self.stats.borrow_mut().property_queries += 1;
        DeviceProperties {
            name: "mock".to_owned(),
            version: "0".to_owned(),
            driver_version: "0".to_owned(),
            language_version: "none".to_owned(),
            compute_units: 1,
        }
    }
}
