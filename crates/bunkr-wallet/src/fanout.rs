//! Bounded concurrent execution with results kept in input order.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FanOutError<E> {
    /// The task for input `.0` returned an error.
    Failed(usize, E),
    /// The task for input `.0` never reported back.
    Lost(usize),
}

/// Run `task` over every input with at most `limit` running at once.
///
/// Each future is spawned on its own task but only polled once it holds a
/// permit, so at most `limit` remote calls are outstanding. Outputs are
/// returned in input order regardless of completion order. The first error
/// aborts every task that has not finished yet.
pub(crate) async fn indexed<I, T, E, F, Fut>(
    inputs: Vec<I>,
    limit: usize,
    task: F,
) -> Result<Vec<T>, FanOutError<E>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    let total = inputs.len();
    for (index, input) in inputs.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let fut = task(input);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (index, fut.await)
        });
    }

    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => slots[index] = Some(value),
            Ok((index, Err(e))) => {
                set.abort_all();
                return Err(FanOutError::Failed(index, e));
            }
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(_) => {}
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.ok_or(FanOutError::Lost(index)))
        .collect()
}
