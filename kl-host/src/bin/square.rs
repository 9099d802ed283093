use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use itertools::Itertools;
use log::info;
use rand::Rng;

use kl_graph::error::GraphResult;
use kl_graph::graph::KernelGraph;
use kl_graph::settings::{GraphSettings, KernelSource};
use kl_host::HostDevice;

/// Square a vector on the host device, optionally feeding the result into a second kernel through a promise.
#[derive(Debug, clap::Parser)]
struct Args {
    /// Comma separated input values.
    #[clap(long, value_delimiter = ',', conflicts_with = "len")]
    values: Vec<f32>,
    /// Use this many random input values instead.
    #[clap(short, long)]
    len: Option<usize>,

    /// Add the input to its square with a second kernel.
    #[clap(short, long)]
    chain: bool,

    /// Directory with the kernel sources, defaults to the kernels shipped with this crate.
    #[clap(short, long)]
    kernels: Option<PathBuf>,

    #[clap(short, long)]
    verbose: bool,
}

fn main() -> GraphResult<()> {
    let Args {
        values,
        len,
        chain,
        kernels,
        verbose,
    } = Args::parse();

    let filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    let input = match len {
        Some(len) => {
            let mut rng = rand::thread_rng();
            (0..len).map(|_| rng.gen_range(-10.0..10.0)).collect_vec()
        }
        None if values.is_empty() => vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        None => values,
    };

    let dir = kernels.unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("kernels"));
    let settings = GraphSettings {
        debug: verbose,
        source: KernelSource::directory(dir),
        ..Default::default()
    };
    let mut graph: KernelGraph<HostDevice, f32> = KernelGraph::with_settings(HostDevice::with_builtins::<f32>(), settings);

    let square = graph.load("square")?;
    graph.bind_input(square, 0, &input)?;
    graph.bind_output(square, 1, None)?;

    let target = if chain {
        let add = graph.load("add")?;
        graph.bind_input(add, 0, &input)?;
        graph.link(square, add, None, [(1, 1)])?;
        graph.bind_output(add, 2, None)?;
        add
    } else {
        square
    };

    let eval = graph.evaluate_kernel(target)?;
    info!("Executed {} kernels", eval.executed_count());

    for kernel in graph.kernels().collect_vec() {
        graph.show_buffers(kernel)?;
    }
    if verbose {
        println!("{}", graph);
    }

    Ok(())
}
