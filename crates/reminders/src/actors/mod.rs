//! Actor-based serialisation of engine input.
//!
//! Snapshots, alarm firings, platform signals and retries all arrive on one
//! ractor mailbox and are handled strictly in order. The engine state is
//! owned by the actor; nothing else can touch it.
//!
//! # Example
//!
//! ```ignore
//! use mealnudge_reminders::actors::{
//!     EngineArguments, EngineMessage, request_schedule, spawn_engine,
//! };
//!
//! let (engine, handle) = spawn_engine(args).await?;
//! engine.send_message(EngineMessage::Snapshot { reminders })?;
//! let schedule = request_schedule(&engine, Duration::from_secs(1)).await?;
//! ```

pub mod engine;
pub mod messages;

pub use engine::{
    EngineActorDef, EngineArguments, EngineState, request_schedule, request_sign_out,
    request_status, spawn_engine,
};
pub use messages::EngineMessage;
