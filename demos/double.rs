//! Beginner demo: double eight numbers on the GPU.
//!
//! Run it with:
//!
//! ```sh
//! cargo run --example double
//! ```
//!
//! The program negotiates a device, uploads `[1, 2, ..., 8]`, runs the
//! doubling kernel once and prints the result.  If no compute-capable
//! adapter is found, a diagnostic is printed instead and the process
//! exits with a non-zero status.

use gpu_doubler::{run_blocking, ConsoleSink, DispatcherOptions, WgpuPlatform};

fn main() {
    // Set RUST_LOG=debug to follow each staging step.
    env_logger::init();
    let options = DispatcherOptions::default();
    let platform = WgpuPlatform::new(options.clone());
    let input: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    if run_blocking(&platform, &input, &mut ConsoleSink, &options).is_err() {
        std::process::exit(1);
    }
}
