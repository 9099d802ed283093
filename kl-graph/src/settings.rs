use std::path::PathBuf;

/// Where [KernelGraph::load](crate::graph::KernelGraph::load) gets kernel source text from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum KernelSource {
    /// Pass an empty source, the device resolves the entry point by name alone.
    Empty,
    /// Read `<dir>/<id>.<extension>`.
    Directory { dir: PathBuf, extension: String },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GraphSettings {
    /// Log the device properties when the graph is created.
    pub debug: bool,
    /// Graph-wide element count used when a kernel has no input to take it from.
    /// When `None` the first input bound on any kernel sets it.
    pub vector_size: Option<usize>,
    pub source: KernelSource,
}

impl KernelSource {
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        KernelSource::Directory {
            dir: dir.into(),
            extension: "cl".to_owned(),
        }
    }

    /// The file a kernel is read from, `None` for [KernelSource::Empty].
    pub fn path_for(&self, id: &str) -> Option<PathBuf> {
        match self {
            KernelSource::Empty => None,
            KernelSource::Directory { dir, extension } => Some(dir.join(format!("{}.{}", id, extension))),
        }
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        GraphSettings {
            debug: false,
            vector_size: None,
            source: KernelSource::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn source_paths() {
        assert_eq!(KernelSource::Empty.path_for("square"), None);

        let source = KernelSource::directory("kernels");
        assert_eq!(source.path_for("square").unwrap(), Path::new("kernels").join("square.cl"));
    }
}
