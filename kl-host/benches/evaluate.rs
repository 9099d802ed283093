use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kl_graph::graph::{Kernel, KernelGraph};
use kl_host::HostDevice;

type Graph = KernelGraph<HostDevice, f32>;

const LEN: usize = 1024;

/// `copy_0 -> copy_1 -> ... -> copy_{n-1}`
fn chain(n: usize) -> (Graph, Kernel, Kernel) {
    let mut device = HostDevice::with_builtins::<f32>();
    for i in 0..n {
        device.alias(&format!("copy_{}", i), "copy");
    }
    let mut graph = Graph::new(device);
    let input = (0..LEN).map(|i| i as f32).collect::<Vec<_>>();

    let first = load_copy(&mut graph, 0);
    graph.bind_input(first, 0, &input).unwrap();

    let mut prev = first;
    for i in 1..n {
        let next = load_copy(&mut graph, i);
        graph.link(prev, next, None, [(1, 0)]).unwrap();
        prev = next;
    }
    graph.bind_output(prev, 1, None).unwrap();

    (graph, first, prev)
}

/// One `fill` source feeding `width` `square` kernels, reduced pairwise with `add`.
fn diamond(width: usize) -> (Graph, Kernel, Kernel) {
    let mut device = HostDevice::with_builtins::<f32>();
    for i in 0..width {
        device.alias(&format!("square_{}", i), "square");
        device.alias(&format!("add_{}", i), "add");
    }
    let mut graph = Graph::new(device);

    let source = graph.load("fill").unwrap();
    graph.bind_scalar(source, 0, 2.0f32).unwrap();
    graph.set_vector_size(Some(LEN));

    let mut layer = (0..width)
        .map(|i| {
            let square = graph.load(&format!("square_{}", i)).unwrap();
            graph.link(source, square, None, [(1, 0)]).unwrap();
            square
        })
        .collect::<Vec<_>>();

    let mut count = 0;
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| match *pair {
                [single] => single,
                [left, right] => {
                    let add = graph.load(&format!("add_{}", count)).unwrap();
                    count += 1;
                    graph.link(left, add, None, [(1, 0)]).unwrap();
                    graph.link(right, add, None, [(1, 1)]).unwrap();
                    add
                }
                _ => unreachable!(),
            })
            .collect();
    }

    let sink = layer[0];
    let arity = graph[sink].arity() as u32;
    graph.bind_output(sink, arity - 1, None).unwrap();

    (graph, source, sink)
}

fn load_copy(graph: &mut Graph, i: usize) -> Kernel {
    graph.load(&format!("copy_{}", i)).unwrap()
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for n in [4, 16, 64] {
        let (mut graph, first, last) = chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                graph.invalidate(first);
                black_box(graph.evaluate_kernel(last).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_diamond(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond");
    for width in [2, 8, 32] {
        let (mut graph, source, sink) = diamond(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                graph.invalidate(source);
                black_box(graph.evaluate_kernel(sink).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_up_to_date(c: &mut Criterion) {
    let (mut graph, _, last) = chain(64);
    graph.evaluate_kernel(last).unwrap();
    c.bench_function("chain/up_to_date", |b| b.iter(|| black_box(graph.evaluate_kernel(last).unwrap())));
}

criterion_group!(benches, bench_chain, bench_diamond, bench_up_to_date);
criterion_main!(benches);
