use std::future::Future;

use async_trait::async_trait;

use super::PollTaskError;

/// One unit of recurring work.
///
/// `fetch` does the asynchronous part; `apply` publishes the result and is
/// skipped when the coordinator was stopped while `fetch` was in flight.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn fetch(&self) -> Result<Self::Output, PollTaskError>;

    fn apply(&self, output: Self::Output);
}

/// Closure adapter for tasks that apply their own effects.
pub struct PollFn<F> {
    f: F,
}

pub fn poll_fn<F, Fut>(f: F) -> PollFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PollTaskError>> + Send + 'static,
{
    PollFn { f }
}

#[async_trait]
impl<F, Fut> PollTask for PollFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PollTaskError>> + Send + 'static,
{
    type Output = ();

    async fn fetch(&self) -> Result<(), PollTaskError> {
        (self.f)().await
    }

    fn apply(&self, _output: ()) {}
}
