//! Builds a pinned rayon pool and reports where each worker landed.
//!
//! Usage: `striped_pool [workers] [pinning_step]`

use {
    agave_thread_pinning::*,
    log::info,
    std::env,
};

fn main() -> Result<(), ThreadingError> {
    solana_logger::setup_with_default("info");

    let mut args = env::args().skip(1);
    let worker_threads = args.next().and_then(|a| a.parse().ok()).unwrap_or(4);
    let pinning_step = args.next().and_then(|a| a.parse().ok()).unwrap_or(1);

    let mask = OsAffinity.capture_process_affinity_mask()?;
    info!(
        "Process mask {mask}, stripe order {:?}",
        stripe_cycle(mask.len(), pinning_step)
    );

    let config = RayonConfig {
        worker_threads,
        core_allocation: CoreAllocation::Striped(PinningConfig {
            pinning_step,
            ..PinningConfig::default()
        }),
        ..RayonConfig::default()
    };
    let runtime = RayonRuntime::new("striped".to_string(), config)?;
    let placements = runtime.broadcast(|ctx| {
        let affinity = OsAffinity
            .capture_process_affinity_mask()
            .map(|mask| mask.to_string())
            .unwrap_or_else(|e| e.to_string());
        (ctx.index(), affinity)
    });

    for (worker, affinity) in placements {
        info!("worker {worker}: CPUs {affinity}");
    }
    info!(
        "{} workers inside the pool, locks use the {MUTEX_STRATEGY} strategy",
        runtime.current_concurrency()
    );
    Ok(())
}
