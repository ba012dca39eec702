//! Worker consumer
//!
//! Workers compete for requests on the durable request subject. Each one
//! handles a single request at a time:
//!
//! 1. decode the request and look up its personality
//! 2. try the personality's opening book (unless the request skips it)
//! 3. otherwise ask the engine adapter, with the personality's think time
//! 4. publish the result on the game's response subject, then acknowledge
//!
//! A request is only acknowledged once its result is published. If a worker
//! dies in between, the broker redelivers the request and the engine may be
//! asked twice for the same position.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use polybook::{BookMove, WeightedSelector};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Message, MessageBroker};
use crate::config::DispatchConfig;
use crate::engine::{EngineAdapter, EngineSettings};
use crate::error::{DispatchError, DispatchResult};
use crate::models::{MoveRequest, MoveResult, ResultKind};
use crate::personalities::{accepts_draw, Personality, PersonalityRegistry};

pub struct Worker {
    id: usize,
    broker: Arc<dyn MessageBroker>,
    config: Arc<DispatchConfig>,
    registry: Arc<PersonalityRegistry>,
    engine: Arc<dyn EngineAdapter>,
    selector: Arc<Mutex<WeightedSelector>>,
}

impl Worker {
    pub fn new(
        id: usize,
        broker: Arc<dyn MessageBroker>,
        config: Arc<DispatchConfig>,
        registry: Arc<PersonalityRegistry>,
        engine: Arc<dyn EngineAdapter>,
    ) -> Self {
        Worker {
            id,
            broker,
            config,
            registry,
            engine,
            selector: Arc::new(Mutex::new(WeightedSelector::from_entropy())),
        }
    }

    /// Replace the OS-seeded book selector
    pub fn with_selector(mut self, selector: WeightedSelector) -> Self {
        self.selector = Arc::new(Mutex::new(selector));
        self
    }

    /// Resolve one request. Every failure becomes an error result.
    #[tracing::instrument(
        skip_all,
        fields(worker = self.id, game_id = %request.game_id, personality = %request.personality)
    )]
    pub async fn handle_request(&self, request: &MoveRequest) -> MoveResult {
        let game_id = Some(request.game_id.clone());

        let personality = match self.registry.require(&request.personality) {
            Ok(personality) => personality,
            Err(e) => {
                tracing::warn!("{e}");
                return MoveResult::failure(ResultKind::Engine, game_id, e.to_string());
            }
        };

        if request.skip_book {
            tracing::debug!("book skipped by request");
        } else {
            match self.lookup_book(request, &personality.book).await {
                Ok(book_move) => {
                    tracing::info!(mv = %book_move.uci, weight = book_move.weight, "book move");
                    return MoveResult::book(book_move.uci, request.game_id.clone());
                }
                Err(DispatchError::Book(e)) if e.is_no_book_move() => {
                    tracing::debug!(book = %personality.book, "out of book");
                }
                Err(e) => {
                    tracing::warn!(book = %personality.book, "book lookup failed: {e}");
                    return MoveResult::failure(ResultKind::Book, game_id, e.to_string());
                }
            }
        }

        self.ask_engine(request, personality).await
    }

    async fn lookup_book(&self, request: &MoveRequest, book: &str) -> DispatchResult<BookMove> {
        let moves = request.moves.clone();
        let book_dir: PathBuf = self.config.book_dir.clone();
        let book = book.to_string();
        let selector = Arc::clone(&self.selector);

        // Book files are read and parsed on every lookup
        let found = tokio::task::spawn_blocking(move || {
            let mut selector = selector.lock();
            polybook::book_move(moves.as_slice(), &book_dir, &book, &mut *selector)
        })
        .await
        .map_err(|e| DispatchError::engine(format!("book lookup task failed: {e}")))?;

        Ok(found?)
    }

    async fn ask_engine(&self, request: &MoveRequest, personality: &Personality) -> MoveResult {
        let game_id = Some(request.game_id.clone());
        let clock_budget = match request.clock_time {
            Some(centis) => Duration::from_millis(centis.saturating_mul(10)),
            None => self.registry.clock_budget(personality),
        };

        let settings = EngineSettings {
            moves: request.moves.clone(),
            params: personality.params,
            clock_budget,
            random_is_off: request.random_is_off,
            stop_id: request.stop_id,
        };
        tracing::debug!(clock = %humantime::format_duration(clock_budget), "asking engine");

        match self.engine.resolve(&settings).await {
            Ok(mut result) => {
                result.kind = ResultKind::Engine;
                result.game_id = game_id;
                if let Some(err) = &result.err {
                    tracing::warn!("engine rejected the position: {err}");
                    result.algebra_move = None;
                    result.coordinate_move = None;
                    result.will_accept_draw = false;
                    return result;
                }
                if result.move_text().is_none() {
                    tracing::warn!("engine answered without a move");
                    return MoveResult::failure(
                        ResultKind::Engine,
                        result.game_id,
                        "engine returned no move",
                    );
                }
                result.will_accept_draw = result.eval.is_some_and(|eval| {
                    accepts_draw(i64::from(eval), request.moves.len(), personality.params.cfd)
                });
                tracing::info!(
                    mv = result.move_text().unwrap_or("-"),
                    eval = ?result.eval,
                    depth = ?result.depth,
                    "engine move"
                );
                result
            }
            Err(e) => {
                tracing::warn!("engine failed: {e}");
                MoveResult::failure(ResultKind::Engine, game_id, e.to_string())
            }
        }
    }

    /// Handle one delivered message: answer it, then acknowledge it
    ///
    /// An `Err` means the result could not be published; the message is left
    /// unacknowledged so the broker redelivers it.
    pub async fn process(&self, message: &Message) -> DispatchResult<()> {
        let request: MoveRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => return self.reject(message, e.to_string()).await,
        };
        if let Err(e) = request.validate() {
            return self.reject(message, e.to_string()).await;
        }

        if message.delivery_count > 1 {
            tracing::info!(
                game_id = %request.game_id,
                deliveries = message.delivery_count,
                "request redelivered"
            );
        }

        let result = self.handle_request(&request).await;
        let subject = self.config.response_subject(&request.game_id);
        self.broker
            .publish(&subject, serde_json::to_vec(&result)?)
            .await?;
        message.ack().await
    }

    /// Answer an unusable request if its game id can still be found,
    /// otherwise drop it. Either way it is acknowledged.
    async fn reject(&self, message: &Message, reason: String) -> DispatchResult<()> {
        match recover_game_id(&message.payload) {
            Some(game_id) => {
                tracing::warn!(%game_id, sequence = message.sequence, "bad request: {reason}");
                let result =
                    MoveResult::failure(ResultKind::Engine, Some(game_id.clone()), reason);
                let subject = self.config.response_subject(&game_id);
                if let Err(e) = self
                    .broker
                    .publish(&subject, serde_json::to_vec(&result)?)
                    .await
                {
                    tracing::warn!(%game_id, "could not answer bad request: {e}");
                }
            }
            None => {
                tracing::warn!(
                    sequence = message.sequence,
                    "dropping undecodable request: {reason}"
                );
            }
        }
        message.ack().await
    }

    /// Pull and process requests until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let subject = self.config.request_subject.clone();
        tracing::info!(worker = self.id, %subject, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetched = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                fetched = self.broker.fetch(&subject, self.config.fetch_wait) => fetched,
            };

            match fetched {
                Ok(Some(message)) => {
                    if let Err(e) = self.process(&message).await {
                        tracing::error!(
                            worker = self.id,
                            sequence = message.sequence,
                            "request left for redelivery: {e}"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker = self.id, "fetch failed: {e}");
                    tokio::time::sleep(self.config.fetch_wait).await;
                }
            }
        }

        tracing::info!(worker = self.id, "worker stopped");
    }
}

/// `gameId` of a payload that is JSON but not a valid request
fn recover_game_id(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let game_id = value.get("gameId")?.as_str()?;
    let usable = !game_id.is_empty()
        && game_id.len() <= crate::models::MAX_ID_LEN
        && game_id.chars().all(|c| c.is_ascii_alphanumeric());
    usable.then(|| game_id.to_string())
}

/// A set of workers sharing one request queue
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Declare the request queue and start `config.workers` workers.
    ///
    /// `engine_for` is called once per worker with the worker's index; each
    /// worker owns the adapter it gets.
    pub async fn spawn<F>(
        broker: Arc<dyn MessageBroker>,
        config: Arc<DispatchConfig>,
        registry: Arc<PersonalityRegistry>,
        mut engine_for: F,
    ) -> DispatchResult<Self>
    where
        F: FnMut(usize) -> Arc<dyn EngineAdapter>,
    {
        config.validate()?;
        broker
            .declare_queue(&config.request_subject, config.ack_wait)
            .await?;

        let (shutdown, watcher) = watch::channel(false);
        let handles = (0..config.workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    Arc::clone(&broker),
                    Arc::clone(&config),
                    Arc::clone(&registry),
                    engine_for(id),
                );
                let watcher = watcher.clone();
                tokio::spawn(async move { worker.run(watcher).await })
            })
            .collect();

        tracing::info!(workers = config.workers, "worker pool started");
        Ok(WorkerPool { shutdown, handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every worker and wait for them to finish their current request
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("worker task failed: {e}");
            }
        }
    }
}
