use std::fmt;


type Produce<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'static>;

/// Единица работы: замыкание, которое либо возвращает `T`, либо падает с ошибкой.
///
/// Пул не знает, что внутри. Разделяемое изменяемое состояние, которое
/// захватывает замыкание, синхронизирует вызывающая сторона.
pub struct WorkUnit<T> {
    produce: Produce<T>,
}

impl<T> WorkUnit<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            produce: Box::new(f),
        }
    }

    /// Единица работы, которая не может упасть (кроме паники)
    pub fn infallible<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::new(move || Ok(f()))
    }

    #[inline]
    pub fn produce(self) -> anyhow::Result<T> {
        (self.produce)()
    }
}

impl<T> fmt::Debug for WorkUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_runs_the_closure_once() {
        let name = String::from("unit");
        let unit = WorkUnit::new(move || Ok(name.len()));
        assert_eq!(unit.produce().unwrap(), 4);
    }

    #[test]
    fn produce_surfaces_the_error() {
        let unit: WorkUnit<u32> = WorkUnit::new(|| anyhow::bail!("no input"));
        let err = unit.produce().unwrap_err();
        assert_eq!(err.to_string(), "no input");
    }

    #[test]
    fn infallible_wraps_in_ok() {
        let unit = WorkUnit::infallible(|| 7u8);
        assert_eq!(unit.produce().unwrap(), 7);
    }
}
