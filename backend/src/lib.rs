//! Move dispatch for automated chess personalities
//!
//! A request for a personality's next move is answered from its opening
//! book when possible. Otherwise it is queued for a pool of workers that
//! drive the legacy engine, and the caller waits for the worker's answer.
//!
//! ```text
//! DispatchClient --publish--> move-req --fetch--> Worker --book/engine-->
//!       ^                                            |
//!       +------------- move-res.<gameId> <-----------+
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod personalities;
pub mod worker;

pub use broker::{MemoryBroker, Message, MessageBroker, Subscription};
pub use client::DispatchClient;
pub use config::{ClockTiers, DispatchConfig};
pub use engine::{EngineAdapter, EngineSettings, UnavailableEngine};
pub use error::{DispatchError, DispatchResult};
pub use models::{MoveRequest, MoveResult, ResultKind};
pub use personalities::{accepts_draw, Personality, PersonalityRegistry, TuningParams};
pub use worker::{Worker, WorkerPool};
