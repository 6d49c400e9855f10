use std::future::Future;

use async_trait::async_trait;

use crate::error::BusResult;

/// Receives messages published to the topic it is registered under.
///
/// Any `Fn(M) -> impl Future<Output = BusResult<()>>` closure is a handler.
#[async_trait]
pub trait Handler<M>: Send + Sync + 'static {
    async fn handle(&self, message: M) -> BusResult<()>;
}

#[async_trait]
impl<M, F, Fut> Handler<M> for F
where
    M: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BusResult<()>> + Send + 'static,
{
    async fn handle(&self, message: M) -> BusResult<()> {
        (self)(message).await
    }
}
