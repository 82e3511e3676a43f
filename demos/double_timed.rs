//! Element-wise doubling on the GPU versus the CPU, with timings.
//!
//! This demo doubles a larger vector on both paths and reports how long
//! each took.  The GPU timing includes uploading the data, dispatching
//! the shader and reading the result back, but not device negotiation
//! or kernel compilation, which happen once up front.  The result is too
//! long to print, so the output surface shows a placeholder and the
//! values are only logged at debug level.

use std::time::Instant;

use gpu_doubler::{
    cpu_double, negotiate, ConsoleSink, Dispatcher, DispatcherOptions, OutputSink, Presentation,
    WgpuPlatform, DONE_PLACEHOLDER,
};
use log::{debug, info};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = DispatcherOptions::default();
    let platform = WgpuPlatform::new(options.clone());
    let mut sink = ConsoleSink;

    let dispatcher = match pollster::block_on(async {
        let device = negotiate(&platform).await?;
        Dispatcher::new(device).await
    }) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            sink.present(Presentation::Diagnostic(&e.diagnostic()));
            std::process::exit(1);
        }
    };
    info!("adapter: {}", dispatcher.device().adapter_info().name);

    let n: usize = 1_000_000;
    let input: Vec<f32> = (0..n).map(|i| i as f32).collect();

    let start = Instant::now();
    let cpu_output = cpu_double(&input);
    let cpu_time = start.elapsed();

    let start = Instant::now();
    let gpu_output = match dispatcher.double_blocking(&input) {
        Ok(output) => output,
        Err(e) => {
            sink.present(Presentation::Diagnostic(&e.diagnostic()));
            std::process::exit(1);
        }
    };
    let gpu_time = start.elapsed();

    let mismatches = cpu_output
        .iter()
        .zip(&gpu_output)
        .filter(|(cpu, gpu)| cpu != gpu)
        .count();
    info!("n = {n}: CPU = {cpu_time:?}, GPU = {gpu_time:?}, mismatches = {mismatches}");
    debug!("result: {gpu_output:?}");

    if options.exceeds_render_limit(gpu_output.len()) {
        sink.present(Presentation::Placeholder(DONE_PLACEHOLDER));
    } else {
        sink.present(Presentation::Values(&gpu_output));
    }
    if mismatches > 0 {
        std::process::exit(2);
    }
}
