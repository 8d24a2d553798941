use async_fn_stream::{TryStreamEmitter, try_fn_stream};
use async_trait::async_trait;
use futures::Stream;

use crate::message::PipelineMessage;

#[async_trait]
pub trait PipelineStream: Send {
    async fn run(
        &mut self,
        emitter: TryStreamEmitter<PipelineMessage, anyhow::Error>,
    ) -> anyhow::Result<()>;

    fn launch(&mut self) -> impl Stream<Item = anyhow::Result<PipelineMessage>> + '_
    where
        Self: Sized,
    {
        try_fn_stream(|emitter| async move { self.run(emitter).await })
    }
}
