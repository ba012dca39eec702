//! Dispatch client
//!
//! Hands requests the opening book could not answer to the worker queue and
//! waits for the worker's answer on the game's response subject.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::broker::MessageBroker;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::models::{MoveRequest, MoveResult};

#[derive(Clone)]
pub struct DispatchClient {
    broker: Arc<dyn MessageBroker>,
    config: Arc<DispatchConfig>,
}

impl DispatchClient {
    /// Client publishing on `config.request_subject`
    ///
    /// Declares the request queue, so requests sent before any worker is
    /// running wait in the queue instead of being dropped.
    pub async fn connect(
        broker: Arc<dyn MessageBroker>,
        config: Arc<DispatchConfig>,
    ) -> DispatchResult<Self> {
        config.validate()?;
        broker
            .declare_queue(&config.request_subject, config.ack_wait)
            .await?;
        Ok(DispatchClient { broker, config })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Queue `request` and wait up to `timeout` for the worker's result.
    ///
    /// The response subscription is opened before the request is published,
    /// so a worker that answers immediately cannot be missed. It is released
    /// on every return path; a response arriving after the deadline is
    /// dropped by the broker.
    ///
    /// Two concurrent calls for the same game id share a response subject
    /// and may receive each other's result.
    pub async fn resolve(
        &self,
        request: &MoveRequest,
        timeout: Duration,
    ) -> DispatchResult<MoveResult> {
        request.validate()?;

        let subject = self.config.response_subject(&request.game_id);
        let mut responses = self.broker.subscribe(&subject).await?;

        let payload = serde_json::to_vec(request)?;
        self.broker
            .publish(&self.config.request_subject, payload)
            .await?;
        tracing::debug!(
            game_id = %request.game_id,
            personality = %request.personality,
            moves = request.moves.len(),
            "move request queued"
        );

        let message = match tokio::time::timeout(timeout, responses.next_message()).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(DispatchError::transport(format!(
                    "response subscription on {subject} closed"
                )))
            }
            Err(_) => {
                tracing::warn!(
                    game_id = %request.game_id,
                    timeout = %humantime::format_duration(timeout),
                    "no worker answered in time"
                );
                return Err(DispatchError::Timeout {
                    game_id: request.game_id.clone(),
                    after: timeout,
                });
            }
        };
        drop(responses);

        message.ack().await?;
        let result: MoveResult = serde_json::from_slice(&message.payload)?;
        tracing::debug!(
            game_id = %request.game_id,
            kind = ?result.kind,
            success = result.is_success(),
            "move result received"
        );
        Ok(result)
    }

    /// [`resolve`](Self::resolve) with the configured timeout
    pub async fn resolve_default(&self, request: &MoveRequest) -> DispatchResult<MoveResult> {
        self.resolve(request, self.config.resolve_timeout).await
    }

    /// Queue `request` without waiting for its result
    pub async fn push(&self, request: &MoveRequest) -> DispatchResult<()> {
        request.validate()?;
        let payload = serde_json::to_vec(request)?;
        self.broker
            .publish(&self.config.request_subject, payload)
            .await?;
        tracing::debug!(game_id = %request.game_id, "move request pushed");
        Ok(())
    }

    /// Results for every game, as workers publish them
    pub async fn responses(
        &self,
    ) -> DispatchResult<impl Stream<Item = DispatchResult<MoveResult>> + Send + Unpin> {
        let subscription = self
            .broker
            .subscribe(&self.config.response_wildcard())
            .await?;

        Ok(subscription.map(|message| {
            serde_json::from_slice::<MoveResult>(&message.payload).map_err(DispatchError::from)
        }))
    }
}
