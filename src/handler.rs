// src/handler.rs

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

/// Application logic invoked for every received message.
///
/// Handlers run detached from the delivery that produced the message; an
/// `Err` is logged and counted but never reaches the broker.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync + 'static {
    async fn handle(&self, message: M) -> anyhow::Result<()>;
}

#[async_trait]
impl<M, H> MessageHandler<M> for Arc<H>
where
    M: Send + 'static,
    H: MessageHandler<M> + ?Sized,
{
    async fn handle(&self, message: M) -> anyhow::Result<()> {
        (**self).handle(message).await
    }
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<M, F> {
    f: F,
    _message: PhantomData<fn(M)>,
}

pub fn handler_fn<M, F, Fut>(f: F) -> FnHandler<M, F>
where
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        f,
        _message: PhantomData,
    }
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for FnHandler<M, F>
where
    M: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: M) -> anyhow::Result<()> {
        (self.f)(message).await
    }
}
