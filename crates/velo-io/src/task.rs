//! Lazy one-shot tasks.
//!
//! A [`Task`] does nothing until awaited; awaiting it resumes its body on
//! the awaiter's reactor. Dropping a `Task` before completion is cooperative
//! cancellation: the body never runs past its current suspension point and
//! resources unwind in reverse acquisition order.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use velo_error::{Error, Result};

use crate::context::IoContext;

/// Lazy, one-shot, move-only unit of cooperative work.
///
/// Completion yields either a value of type `T` or an [`Error`]. A `Task`
/// that nobody awaits can be detached onto a reactor with
/// [`Task::detach`].
pub struct Task<T> {
    fut: Pin<Box<dyn Future<Output = Result<T>>>>,
}

impl<T> Task<T> {
    /// Wrap a future as a task. The future is not polled until the task is
    /// awaited or detached.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + 'static,
    {
        Self { fut: Box::pin(fut) }
    }

    /// A task that immediately completes with `value`.
    pub fn ready(value: T) -> Self
    where
        T: 'static,
    {
        Self::new(std::future::ready(Ok(value)))
    }

    /// Bound the task by a deadline. If the deadline fires first the task
    /// is cancelled at its next suspension point and the awaiter receives
    /// [`Error::Timeout`].
    pub fn with_deadline(self, deadline: Duration) -> Task<T>
    where
        T: 'static,
    {
        Task::new(async move {
            match tokio::time::timeout(deadline, self).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            }
        })
    }

    /// Run to completion on `io` with nobody awaiting the result.
    pub fn detach(self, io: &IoContext)
    where
        T: 'static,
    {
        io.spawn(self);
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().fut.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Task")
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn task_is_lazy() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let task = Task::new(async move {
            flag.set(true);
            Ok(())
        });
        // Never awaited: the body must not have run.
        drop(task);
        assert!(!ran.get());
    }

    #[test]
    fn ready_completes_synchronously() {
        let io = IoContext::new().expect("reactor");
        let value = io.block_on(Task::ready(7)).expect("ready task");
        assert_eq!(value, 7);
    }

    #[test]
    fn deadline_converts_to_timeout_error() {
        let io = IoContext::new().expect("reactor");
        let task = Task::new(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        })
        .with_deadline(Duration::from_millis(5));
        let err = io.block_on(task).expect_err("should time out");
        assert!(matches!(err, Error::Timeout));
    }
}
