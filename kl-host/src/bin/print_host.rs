use kl_graph::device::Device;
use kl_host::HostDevice;

fn main() {
    env_logger::init();

    let device = HostDevice::with_builtins::<f32>();

    println!("{}", device.properties());
    println!();
    println!("Kernels:");
    for (name, arity) in device.kernels() {
        println!("  {} ({} arguments)", name, arity);
    }
}
