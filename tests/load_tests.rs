#[cfg(test)]
mod tests {
    use batch_pool::{
        pool::{Config, Pool},
        unit::WorkUnit,
    };
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    fn measure<F, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    #[test]
    fn load_test_1_small_fast_units() {
        println!("\n=== LOAD TEST 1: 10k быстрых единиц ===");
        let pool = Pool::with_config(Config {
            report_progress: false,
            ..Config::cpu_bound()
        })
        .unwrap();

        for i in 0..10_000u64 {
            pool.submit(WorkUnit::infallible(move || i * 2)).unwrap();
        }

        let results = measure("10k units", || pool.run_batch().unwrap());
        assert_eq!(results.len(), 10_000);
        assert!(results.iter().enumerate().all(|(i, v)| *v == i as u64 * 2));
    }

    #[test]
    fn load_test_2_blocking_io_units() {
        println!("\n=== LOAD TEST 2: 200 блокирующих единиц (5ms каждая) ===");
        let workers = 20;
        let pool = Pool::new(workers, false, false).unwrap();

        for i in 0..200usize {
            pool.submit(WorkUnit::infallible(move || {
                thread::sleep(Duration::from_millis(5));
                i
            }))
            .unwrap();
        }

        let start = Instant::now();
        let results = pool.run_batch().unwrap();
        let elapsed = start.elapsed();
        println!("  200 x 5ms на {} воркерах: {:?}", workers, elapsed);

        assert_eq!(results, (0..200).collect::<Vec<_>>());
        // последовательно это заняло бы не меньше секунды
        assert!(elapsed < Duration::from_millis(900));
    }

    #[test]
    fn load_test_3_many_batches_on_one_pool() {
        println!("\n=== LOAD TEST 3: 100 батчей подряд ===");
        let pool = Pool::new(4, true, false).unwrap();
        let executed = Arc::new(AtomicUsize::new(0));

        measure("100 batches x 100 units", || {
            for batch in 0..100usize {
                for i in 0..100usize {
                    let executed = executed.clone();
                    pool.submit(WorkUnit::infallible(move || {
                        executed.fetch_add(1, Ordering::Relaxed);
                        batch * 1_000 + i
                    }))
                    .unwrap();
                }
                let results = pool.run_batch().unwrap();
                assert_eq!(results[99], batch * 1_000 + 99);
            }
        });

        assert_eq!(executed.load(Ordering::Relaxed), 10_000);
        let metrics = pool.metrics();
        assert_eq!(metrics.batches_run, 100);
        assert_eq!(metrics.completed_units, 10_000);
        println!("  Success rate: {:.1}%", metrics.success_rate() * 100.0);
    }

    #[test]
    fn load_test_4_progress_under_contention() {
        println!("\n=== LOAD TEST 4: Прогресс при 5k единиц ===");
        let pool = Pool::with_config(Config {
            worker_count: 16,
            report_progress: true,
            progress_step: 10,
            ..Default::default()
        })
        .unwrap();

        for i in 0..5_000u32 {
            pool.submit(WorkUnit::infallible(move || i)).unwrap();
        }
        let tracker = pool.tracker().cloned().unwrap();
        let results = pool.run_batch().unwrap();

        assert_eq!(results.len(), 5_000);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.completed, 5_000);
        assert_eq!(snapshot.last_percent, Some(100));
    }
}
