//! Batch operation helpers (component H supplement): run many independent CRUD calls
//! concurrently and collect every outcome, successes and failures alike, instead of
//! aborting the whole batch on the first error.
//!
//! Grounded on `original_source/examples/09_batch_operations.py`'s
//! `asyncio.gather(..., return_exceptions=True)` pattern.
use futures::future::join_all;
use futures::Future;

use crate::error::Error;

/// The outcome of running [`run_batch`]: every item's result, in the same order as the
/// input futures, plus a count of how many succeeded.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// One result per input future, in input order.
    pub results: Vec<Result<T, Error>>,
}

impl<T> BatchOutcome<T> {
    /// How many calls succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// How many calls failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// The successful values, discarding errors and their positions.
    pub fn oks(self) -> Vec<T> {
        self.results.into_iter().filter_map(Result::ok).collect()
    }

    /// The errors, discarding successes and their positions.
    pub fn errs(self) -> Vec<Error> {
        self.results.into_iter().filter_map(Result::err).collect()
    }
}

/// Run every future in `calls` concurrently and collect all of their outcomes. A failed
/// call never cancels the others; compare with `?`-propagating a `Vec` of results from a
/// plain `try_join_all`, which this deliberately is not.
pub async fn run_batch<T, F>(calls: Vec<F>) -> BatchOutcome<T>
where
    F: Future<Output = Result<T, Error>>,
{
    BatchOutcome { results: join_all(calls).await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorEnvelope;

    #[tokio::test]
    async fn collects_both_successes_and_failures() {
        let calls: Vec<_> = (0..5)
            .map(|i| async move {
                if i % 2 == 0 {
                    Ok::<_, Error>(i)
                } else {
                    Err(Error::NotFound(ErrorEnvelope::default()))
                }
            })
            .collect();

        let outcome = run_batch(calls).await;
        assert_eq!(outcome.succeeded(), 3);
        assert_eq!(outcome.failed(), 2);
        assert_eq!(outcome.oks(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let calls: Vec<std::future::Ready<Result<(), Error>>> = Vec::new();
        let outcome = run_batch(calls).await;
        assert_eq!(outcome.succeeded(), 0);
        assert_eq!(outcome.failed(), 0);
    }
}
