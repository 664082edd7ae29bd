use batch_pool::{Config, Pool, WorkUnit};
use std::time::Instant;
use tracing_subscriber::EnvFilter;


fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let now = Instant::now();
    let pool = Pool::with_config(Config {
        reuse: true,
        progress_step: 10,
        ..Config::cpu_bound()
    })?;

    for round in 1..=2u64 {
        for i in 0..200u64 {
            pool.submit(WorkUnit::infallible(move || {
                (0..=i * 1_000 * round).fold(0u64, |acc, x| acc.wrapping_add(x * x))
            }))?;
        }
        let sums = pool.run_batch()?;
        println!("round {}: {} sums, last = {:?}", round, sums.len(), sums.last());
    }

    pool.close();
    println!("elapsed: {:?}", now.elapsed());
    Ok(())
}
