//! Трекер прогресса батча.
//!
//! Один трекер принадлежит одному пулу и разделяется только задачами его
//! текущего батча. Инкремент счётчика, расчёт процента и вывод строки
//! выполняются под одной блокировкой, поэтому каждый процент выводится не
//! более одного раза и значения только растут.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::debug;
use super::{errors::PoolError, result::PoolResult};


/// Одно обновление прогресса
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub completed: usize,
    pub total: usize,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}% - {}/{}", self.percent, self.completed, self.total)
    }
}

/// Получатель событий прогресса. Вызывается под блокировкой трекера.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub fn stdout_sink() -> ProgressSink {
    Arc::new(|event| println!("{}", event))
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub last_percent: Option<u8>,
}

#[derive(Debug, Default)]
struct ProgressState {
    epoch: u64,
    total: usize,
    completed: usize,
    // None - ниже любого допустимого процента
    last_percent: Option<u8>,
}

/// Допустимый шаг прогресса: `1..=100` процентных пунктов
pub fn validate_step(step: u8) -> PoolResult<()> {
    if !(1..=100).contains(&step) {
        return Err(PoolError::InvalidConfiguration(format!(
            "progress_step must be within 1..=100, got {}",
            step
        )));
    }
    Ok(())
}

pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    step: u8,
    sink: ProgressSink,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            step: 1,
            sink: stdout_sink(),
        }
    }

    /// `step` - минимальный шаг между двумя выводами в процентных пунктах,
    /// `InvalidConfiguration` вне `1..=100`.
    pub fn with_sink(step: u8, sink: ProgressSink) -> PoolResult<Self> {
        validate_step(step)?;
        Ok(Self {
            state: Mutex::new(ProgressState::default()),
            step,
            sink,
        })
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Сбрасывает счётчики под новый батч и возвращает его эпоху
    pub fn initialize(&self, total: usize) -> u64 {
        let mut state = self.lock();
        state.epoch = state.epoch.wrapping_add(1);
        state.total = total;
        state.completed = 0;
        state.last_percent = None;
        state.epoch
    }

    /// Учитывает завершение одной единицы текущего батча
    pub fn record_completion(&self) -> Option<ProgressEvent> {
        let mut state = self.lock();
        self.advance(&mut state)
    }

    /// То же, что [`record_completion`](Self::record_completion), но только
    /// если `epoch` всё ещё текущая. Отчёты брошенных батчей игнорируются.
    pub fn record_completion_in(&self, epoch: u64) -> Option<ProgressEvent> {
        let mut state = self.lock();
        if state.epoch != epoch {
            return None;
        }
        self.advance(&mut state)
    }

    fn advance(&self, state: &mut ProgressState) -> Option<ProgressEvent> {
        if state.total == 0 || state.completed >= state.total {
            return None;
        }
        state.completed += 1;

        let percent = (state.completed as u128 * 100 / state.total as u128) as u8;
        let due = match state.last_percent {
            None => true,
            Some(last) => {
                percent > last && (percent == 100 || percent >= last.saturating_add(self.step))
            }
        };
        if !due {
            return None;
        }

        state.last_percent = Some(percent);
        let event = ProgressEvent {
            percent,
            completed: state.completed,
            total: state.total,
        };
        debug!(percent, completed = event.completed, total = event.total, "batch progress");
        (self.sink)(event);
        Some(event)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            completed: state.completed,
            total: state.total,
            last_percent: state.last_percent,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &*self.lock())
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}
