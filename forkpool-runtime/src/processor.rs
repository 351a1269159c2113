//! User processing logic seam

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;

/// Application logic executed by a worker for every job it receives
///
/// `Ok` is sent back as a result, `Err` as an application-level failure. The
/// runtime never retries; retry policy belongs to the coordinator.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, input: JsonValue) -> Result<JsonValue, JsonValue>;

    /// Called once when the coordinator closes the channel
    async fn on_disconnect(&self) {}
}

/// Processor backed by an async closure
pub struct FnProcessor<F> {
    func: F,
}

/// Wrap an async closure as a [`Processor`]
pub fn processor_fn<F, Fut>(func: F) -> FnProcessor<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, JsonValue>> + Send,
{
    FnProcessor { func }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, JsonValue>> + Send,
{
    async fn process(&self, input: JsonValue) -> Result<JsonValue, JsonValue> {
        (self.func)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_processor() {
        let processor = processor_fn(|input| async move {
            match input.as_i64() {
                Some(n) => Ok(json!(n * 2)),
                None => Err(json!("not a number")),
            }
        });

        assert_eq!(processor.process(json!(21)).await, Ok(json!(42)));
        assert_eq!(
            processor.process(json!("x")).await,
            Err(json!("not a number"))
        );
        processor.on_disconnect().await;
    }
}
