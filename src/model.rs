/// Состояние жизненного цикла пула.
///
/// `Open -> Running -> Open` для переиспользуемого пула,
/// `Open -> Running -> Closed` для одноразового. Из `Closed` выхода нет.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Running,
    Closed,
}

impl Lifecycle {
    #[inline]
    pub fn is_closed(self) -> bool {
        self == Lifecycle::Closed
    }
}


#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub worker_count: usize,
    pub idle_workers: usize,
    pub queued_units: usize,
    pub completed_units: usize,
    pub failed_units: usize,
    pub batches_run: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.worker_count == 0 {
            return 0.0;
        }
        let busy = self.worker_count.saturating_sub(self.idle_workers);
        busy as f64 / self.worker_count as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_units + self.failed_units;
        if total == 0 {
            return 1.0;
        }
        self.completed_units as f64 / total as f64
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_on_empty_metrics() {
        let m = PoolMetrics {
            worker_count: 4,
            idle_workers: 4,
            queued_units: 0,
            completed_units: 0,
            failed_units: 0,
            batches_run: 0,
        };
        assert_eq!(m.utilization(), 0.0);
        assert_eq!(m.success_rate(), 1.0);
    }

    #[test]
    fn success_rate_counts_failures() {
        let m = PoolMetrics {
            worker_count: 2,
            idle_workers: 1,
            queued_units: 0,
            completed_units: 3,
            failed_units: 1,
            batches_run: 1,
        };
        assert_eq!(m.utilization(), 0.5);
        assert_eq!(m.success_rate(), 0.75);
    }
}
