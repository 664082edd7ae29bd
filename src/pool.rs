use super::{
    errors::{PoolError, UnitFailure},
    handle::{Task, UnitHandle, UnitOutcome},
    model::{Lifecycle, PoolMetrics},
    progress::{stdout_sink, validate_step, ProgressSink, ProgressTracker},
    result::PoolResult,
    unit::WorkUnit,
};
use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
};
use crossbeam::deque::{Injector, Steal};
use futures::{
    executor::block_on,
    stream::{FuturesUnordered, StreamExt},
};
use tokio::{
    runtime::{Builder, Runtime},
    sync::{oneshot, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Конфигурация пула
#[derive(Debug, Clone)]
pub struct Config {
    pub worker_count: usize,
    /// `false` - пул закрывается после первого батча
    pub reuse: bool,
    pub report_progress: bool,
    /// Минимальный шаг между строками прогресса, в процентных пунктах
    pub progress_step: u8,
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            reuse: false,
            report_progress: true,
            progress_step: 1,
            thread_name: "batch-pool-worker".to_string(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            worker_count: num_cpus::get(),
            ..Default::default()
        }
    }

    /// Для единиц, которые в основном ждут I/O
    pub fn io_bound() -> Self {
        Self {
            worker_count: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.worker_count == 0 {
            return Err(PoolError::InvalidConfiguration(
                "worker_count must be positive".into(),
            ));
        }
        validate_step(self.progress_step)
    }
}


/// Общая очередь и счётчики воркеров. Не зависит от типа результата.
struct Workers {
    inject: Injector<Task>,
    notify: Notify,
    shutdown: CancellationToken,
    idle_workers: AtomicUsize,
    queued_tasks: AtomicUsize,
    completed_units: AtomicUsize,
    failed_units: AtomicUsize,
}

impl Workers {
    fn new() -> Self {
        Self {
            inject: Injector::new(),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            idle_workers: AtomicUsize::new(0),
            queued_tasks: AtomicUsize::new(0),
            completed_units: AtomicUsize::new(0),
            failed_units: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn push_task(&self, task: Task) {
        self.queued_tasks.fetch_add(1, Ordering::Relaxed);
        self.inject.push(task);
        self.notify.notify_one();
    }

    fn next_task(&self) -> Option<Task> {
        loop {
            match self.inject.steal() {
                Steal::Success(task) => {
                    self.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        debug!(worker = id, "worker started");

        loop {
            if let Some(task) = self.next_task() {
                // единица может блокироваться сколько угодно, слот занят ровно один
                tokio::task::block_in_place(task);
                continue;
            }

            // после отмены воркер дорабатывает очередь и только потом выходит
            if self.shutdown.is_cancelled() {
                break;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.inject.is_empty() {
                continue;
            }

            self.idle_workers.fetch_add(1, Ordering::Relaxed);
            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => {}
            }
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);
        }

        debug!(worker = id, "worker stopped");
    }
}


fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(_) => "unknown panic payload".to_string(),
    }
}

fn run_unit<T>(unit: WorkUnit<T>) -> UnitOutcome<T> {
    match panic::catch_unwind(AssertUnwindSafe(move || unit.produce())) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(UnitFailure::Error(err)),
        Err(payload) => Err(UnitFailure::Panicked(panic_message(payload))),
    }
}


struct PoolState<T> {
    lifecycle: Lifecycle,
    pending: Vec<WorkUnit<T>>,
    runtime: Option<Runtime>,
    worker_loops: Vec<JoinHandle<()>>,
}

/// Пул с фиксированным числом воркеров, исполняющий батчи единиц работы.
///
/// `run_batch` блокирует вызывающий поток до завершения батча и возвращает
/// результаты в порядке отправки. Первая ошибка сразу становится итогом
/// батча; остальные единицы не отменяются, их результаты отбрасываются.
///
/// Одновременно на одном пуле может идти только один батч. `submit` или
/// `run_batch` во время батча получают `PoolError::Busy`.
pub struct Pool<T> {
    config: Config,
    state: Mutex<PoolState<T>>,
    workers: Arc<Workers>,
    tracker: Option<Arc<ProgressTracker>>,
    batches_run: AtomicUsize,
}

/// Возвращает пул из `Running` на любом пути выхода из батча
struct BatchGuard<'a, T> {
    pool: &'a Pool<T>,
}

impl<T> Drop for BatchGuard<'_, T> {
    fn drop(&mut self) {
        self.pool.finish_batch();
    }
}

impl<T> Pool<T>
where
    T: Send + 'static,
{
    pub fn new(worker_count: usize, reuse: bool, report_progress: bool) -> PoolResult<Self> {
        Self::with_config(Config {
            worker_count,
            reuse,
            report_progress,
            ..Default::default()
        })
    }

    pub fn with_config(config: Config) -> PoolResult<Self> {
        Self::with_progress_sink(config, stdout_sink())
    }

    /// Строки прогресса уходят в `sink` вместо stdout.
    /// Если `report_progress == false`, sink не используется.
    pub fn with_progress_sink(config: Config, sink: ProgressSink) -> PoolResult<Self> {
        config.validate()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_count)
            .thread_name(config.thread_name.clone())
            .build()?;

        let workers = Arc::new(Workers::new());
        let worker_loops = (0..config.worker_count)
            .map(|id| runtime.spawn(workers.clone().worker_loop(id)))
            .collect();

        let tracker = if config.report_progress {
            Some(Arc::new(ProgressTracker::with_sink(config.progress_step, sink)?))
        } else {
            None
        };

        info!(
            workers = config.worker_count,
            reuse = config.reuse,
            progress = config.report_progress,
            "batch pool created"
        );

        Ok(Self {
            config,
            state: Mutex::new(PoolState {
                lifecycle: Lifecycle::Open,
                pending: Vec::new(),
                runtime: Some(runtime),
                worker_loops,
            }),
            workers,
            tracker,
            batches_run: AtomicUsize::new(0),
        })
    }

    pub fn submit(&self, unit: WorkUnit<T>) -> PoolResult<()> {
        let mut state = self.lock();
        match state.lifecycle {
            Lifecycle::Open => {
                state.pending.push(unit);
                Ok(())
            }
            Lifecycle::Running => Err(PoolError::Busy),
            Lifecycle::Closed => Err(PoolError::Closed),
        }
    }

    #[inline]
    pub fn submit_fn<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit(WorkUnit::new(f))
    }

    /// Исполняет все отправленные единицы и возвращает их результаты
    /// в порядке отправки, либо первую ошибку.
    pub fn run_batch(&self) -> PoolResult<Vec<T>> {
        let handles = self.begin_batch()?;
        let _guard = BatchGuard { pool: self };

        let total = handles.len();
        let outcome = block_on(join_ordered(handles));

        match &outcome {
            Ok(_) => info!(units = total, "batch completed"),
            Err(err) => warn!(units = total, error = %err, "batch failed"),
        }
        outcome
    }

    /// Как `run_batch`, но ждёт все единицы и отдаёт исход каждой.
    /// `Err` только если пул закрыли посреди батча.
    pub fn run_batch_settled(&self) -> PoolResult<Vec<UnitOutcome<T>>> {
        let handles = self.begin_batch()?;
        let _guard = BatchGuard { pool: self };

        let total = handles.len();
        let outcome = block_on(join_settled(handles));

        if let Ok(results) = &outcome {
            let failed = results.iter().filter(|r| r.is_err()).count();
            info!(units = total, failed, "batch settled");
        }
        outcome
    }

    /// `Open -> Running` и постановка всего батча в очередь воркеров.
    /// Всё под блокировкой состояния: close() не может вклиниться между
    /// проверкой и push, поэтому каждая поставленная единица будет исполнена.
    fn begin_batch(&self) -> PoolResult<Vec<UnitHandle<T>>> {
        let mut state = self.lock();
        match state.lifecycle {
            Lifecycle::Open => {}
            Lifecycle::Running => return Err(PoolError::Busy),
            Lifecycle::Closed => return Err(PoolError::Closed),
        }
        state.lifecycle = Lifecycle::Running;
        let batch = mem::take(&mut state.pending);
        Ok(self.dispatch_batch(batch))
    }

    fn dispatch_batch(&self, batch: Vec<WorkUnit<T>>) -> Vec<UnitHandle<T>> {
        info!(
            units = batch.len(),
            workers = self.config.worker_count,
            "processing {} units with {} workers",
            batch.len(),
            self.config.worker_count
        );

        let progress = self
            .tracker
            .as_ref()
            .map(|tracker| (tracker.clone(), tracker.initialize(batch.len())));

        batch
            .into_iter()
            .enumerate()
            .map(|(index, unit)| self.dispatch(index, unit, progress.clone()))
            .collect()
    }

    fn dispatch(
        &self,
        index: usize,
        unit: WorkUnit<T>,
        progress: Option<(Arc<ProgressTracker>, u64)>,
    ) -> UnitHandle<T> {
        let (tx, rx) = oneshot::channel::<UnitOutcome<T>>();
        let workers = self.workers.clone();

        let task: Task = Box::new(move || {
            let outcome = run_unit(unit);

            match &outcome {
                Ok(_) => {
                    workers.completed_units.fetch_add(1, Ordering::Relaxed);
                }
                Err(failure) => {
                    workers.failed_units.fetch_add(1, Ordering::Relaxed);
                    warn!(index, error = %failure, "work unit failed");
                }
            }

            if let Some((tracker, epoch)) = progress {
                tracker.record_completion_in(epoch);
            }

            // получатель уже мог уйти после fail-fast
            let _ = tx.send(outcome);
        });

        self.workers.push_task(task);
        UnitHandle::new(index, rx)
    }
}

impl<T> Pool<T> {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_batch(&self) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        if self.config.reuse {
            let mut state = self.lock();
            // close() во время батча имеет приоритет
            if state.lifecycle == Lifecycle::Running {
                state.lifecycle = Lifecycle::Open;
            }
        } else {
            self.close();
        }
    }

    /// Перестаёт принимать работу и освобождает воркеры. Идемпотентно.
    ///
    /// Не блокирует. Уже поставленные в очередь единицы дорабатываются в
    /// фоне, после чего воркеры завершаются и runtime гасится. Отправленные,
    /// но не запущенные через `run_batch` единицы выбрасываются.
    pub fn close(&self) {
        let (runtime, worker_loops) = {
            let mut state = self.lock();
            if state.lifecycle.is_closed() {
                return;
            }
            state.lifecycle = Lifecycle::Closed;
            state.pending.clear();
            (state.runtime.take(), mem::take(&mut state.worker_loops))
        };

        self.workers.shutdown.cancel();
        if let Some(runtime) = runtime {
            retire_runtime(
                runtime,
                worker_loops,
                &self.workers,
                format!("{}-reaper", self.config.thread_name),
            );
        }

        info!(
            queued_units = self.workers.queued_tasks.load(Ordering::Relaxed),
            "batch pool closed"
        );
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    #[inline]
    pub fn is_reusable(&self) -> bool {
        self.config.reuse
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn tracker(&self) -> Option<&Arc<ProgressTracker>> {
        self.tracker.as_ref()
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            worker_count: self.config.worker_count,
            idle_workers: self.workers.idle_workers.load(Ordering::Relaxed),
            queued_units: self.workers.queued_tasks.load(Ordering::Relaxed),
            completed_units: self.workers.completed_units.load(Ordering::Relaxed),
            failed_units: self.workers.failed_units.load(Ordering::Relaxed),
            batches_run: self.batches_run.load(Ordering::Relaxed),
        }
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        self.close();
    }
}


/// Дожидается выхода воркеров в отдельном потоке и гасит runtime.
/// Дропать runtime из вызывающего потока нельзя: он может быть async-контекстом.
fn retire_runtime(
    runtime: Runtime,
    worker_loops: Vec<JoinHandle<()>>,
    workers: &Workers,
    name: String,
) {
    let (tx, rx) = crossbeam::channel::bounded::<Runtime>(1);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        if let Ok(runtime) = rx.recv() {
            runtime.block_on(async move {
                for handle in worker_loops {
                    let _ = handle.await;
                }
            });
        }
    });

    let runtime = match spawned {
        Ok(_) => match tx.send(runtime) {
            Ok(()) => return,
            Err(returned) => returned.into_inner(),
        },
        Err(err) => {
            warn!(error = %err, "failed to spawn runtime reaper");
            runtime
        }
    };
    // воркеров больше нет: очередь выбрасывается, её handle получат `Closed`
    runtime.shutdown_background();
    while workers.next_task().is_some() {}
}


async fn join_ordered<T>(handles: Vec<UnitHandle<T>>) -> PoolResult<Vec<T>> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None)
        .take(handles.len())
        .collect();
    let mut in_flight: FuturesUnordered<_> = handles.into_iter().collect();

    while let Some((index, result)) = in_flight.next().await {
        // при ошибке остальные handle дропаются вместе с in_flight
        slots[index] = Some(result?);
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or(PoolError::Closed))
        .collect()
}

async fn join_settled<T>(handles: Vec<UnitHandle<T>>) -> PoolResult<Vec<UnitOutcome<T>>> {
    let mut slots: Vec<Option<UnitOutcome<T>>> = std::iter::repeat_with(|| None)
        .take(handles.len())
        .collect();
    let mut in_flight: FuturesUnordered<_> = handles.into_iter().map(UnitHandle::settled).collect();

    while let Some((index, result)) = in_flight.next().await {
        slots[index] = Some(result?);
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or(PoolError::Closed))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_rejected() {
        let err = Pool::<u32>::new(0, false, false).err().unwrap();
        assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    }

    #[test]
    fn progress_step_out_of_range_rejected() {
        let config = Config {
            worker_count: 1,
            progress_step: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            worker_count: 1,
            progress_step: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn presets_are_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::cpu_bound().validate().is_ok());
        let io = Config::io_bound();
        assert!(io.validate().is_ok());
        assert_eq!(io.worker_count, num_cpus::get() * 2);
    }

    #[test]
    fn panic_message_extracts_payload() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload), "unknown panic payload");
    }

    #[test]
    fn join_ordered_places_by_index() {
        let (handles, senders): (Vec<_>, Vec<_>) = (0..3)
            .map(|i| {
                let (tx, rx) = oneshot::channel::<UnitOutcome<usize>>();
                (UnitHandle::new(i, rx), tx)
            })
            .unzip();
        for (i, tx) in senders.into_iter().enumerate().rev() {
            tx.send(Ok(i * 10)).unwrap();
        }
        assert_eq!(block_on(join_ordered(handles)).unwrap(), vec![0, 10, 20]);
    }

    #[test]
    fn dropped_sender_resolves_as_closed() {
        let (tx, rx) = oneshot::channel::<UnitOutcome<u8>>();
        drop(tx);
        let err = block_on(join_ordered(vec![UnitHandle::new(0, rx)])).unwrap_err();
        assert!(err.is_closed());
    }
}
