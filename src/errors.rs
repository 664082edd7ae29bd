use thiserror::Error;


/// Причина, по которой отдельная единица работы не вернула результат
#[derive(Debug, Error)]
pub enum UnitFailure {
    #[error(transparent)]
    Error(#[from] anyhow::Error),
    #[error("panicked: {0}")]
    Panicked(String),
}

impl UnitFailure {
    pub fn is_panic(&self) -> bool {
        matches!(self, UnitFailure::Panicked(_))
    }
}


#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,
    #[error("pool is busy running a batch")]
    Busy,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("work unit #{index} failed: {failure}")]
    WorkUnitFailure {
        index: usize,
        #[source]
        failure: UnitFailure,
    },
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl PoolError {
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed)
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        matches!(self, PoolError::Busy)
    }

    #[inline]
    pub fn is_unit_failure(&self) -> bool {
        matches!(self, PoolError::WorkUnitFailure { .. })
    }

    /// Индекс упавшей единицы работы в порядке отправки
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            PoolError::WorkUnitFailure { index, .. } => Some(*index),
            _ => None,
        }
    }
}
