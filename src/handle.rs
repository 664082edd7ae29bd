use super::{
    errors::{PoolError, UnitFailure},
    result::PoolResult,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;


/// Задача в очереди воркеров: единица работы со стёртым типом результата
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub type UnitOutcome<T> = Result<T, UnitFailure>;


/// Handle на результат одной единицы работы.
///
/// Резолвится в `(index, result)`. Если задача была выброшена из очереди при
/// закрытии пула, результат - `PoolError::Closed`.
pub struct UnitHandle<T> {
    index: usize,
    receiver: oneshot::Receiver<UnitOutcome<T>>,
}

impl<T> UnitHandle<T> {
    pub fn new(index: usize, receiver: oneshot::Receiver<UnitOutcome<T>>) -> Self {
        Self { index, receiver }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Вариант без превращения ошибки единицы в `PoolError`
    pub fn settled(self) -> Settled<T> {
        Settled(self)
    }
}

impl<T> Future for UnitHandle<T> {
    type Output = (usize, PoolResult<T>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let index = this.index;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(Ok(value))) => Poll::Ready((index, Ok(value))),
            Poll::Ready(Ok(Err(failure))) => {
                Poll::Ready((index, Err(PoolError::WorkUnitFailure { index, failure })))
            }
            Poll::Ready(Err(_)) => Poll::Ready((index, Err(PoolError::Closed))),
            Poll::Pending => Poll::Pending,
        }
    }
}


pub struct Settled<T>(UnitHandle<T>);

impl<T> Future for Settled<T> {
    type Output = (usize, PoolResult<UnitOutcome<T>>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let handle = &mut self.get_mut().0;
        let index = handle.index;
        match Pin::new(&mut handle.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready((index, Ok(outcome))),
            Poll::Ready(Err(_)) => Poll::Ready((index, Err(PoolError::Closed))),
            Poll::Pending => Poll::Pending,
        }
    }
}
