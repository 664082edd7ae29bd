//! Пул с фиксированным числом воркеров для батчей независимых задач
//!
//! # Features
//! - Результаты в порядке отправки, независимо от порядка завершения
//! - Fail-fast: первая ошибка единицы работы становится итогом батча
//! - Одноразовый или переиспользуемый пул
//! - Прогресс в процентах без повторов, только по возрастанию
//! - Паники в единицах работы перехватываются и становятся ошибками

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod progress;
pub mod result;
pub mod unit;

pub use errors::{PoolError, UnitFailure};
pub use model::{Lifecycle, PoolMetrics};
pub use pool::{Config, Pool};
pub use progress::{ProgressEvent, ProgressSink, ProgressTracker};
pub use result::PoolResult;
pub use unit::WorkUnit;
