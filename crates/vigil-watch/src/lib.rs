//! Vigil presence watcher components.
//!
//! This crate supervises one logical subscription to a remote push-based
//! presence feed, converts redundant "current state" events into true
//! transitions, and raises a notification for each transition exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  FeedConnector  │  (upstream presence feed, behind a trait)
//! └────────┬────────┘
//!          │ connect / fault / retry
//!          ▼
//! ┌─────────────────┐
//! │   Supervisor    │  State machine, backoff, staleness watchdog
//! └────────┬────────┘
//!          │ ordered FeedEvent channel
//!          ▼
//! ┌─────────────────┐
//! │  Orchestrator   │  Decode boundary, reconciliation, wiring
//! └────────┬────────┘
//!          │ update / transitions
//!          ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │   StateStore    │      │   NotifySink    │
//! │ (JSON snapshot) │      │ (webhook / log) │
//! └─────────────────┘      └─────────────────┘
//! ```
//!
//! The supervisor never gives up: transient faults retry with capped,
//! jittered exponential backoff; authentication rejections cool down for a
//! fixed long window before retrying.

pub mod backoff;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod source;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod watchdog;

pub use error::{Error, Result};

// Re-export the main component types for convenience
pub use backoff::{BackoffPolicy, FixedJitter, JitterSource, RandomJitter};
pub use config::Config;
pub use notify::{LogSink, NotifySink, TransitionKind, TransitionNotice, WebhookSink};
pub use orchestrator::Orchestrator;
pub use source::{FeedConnector, FeedStream, HttpFeedConnector, PresenceSnapshot};
pub use store::{StateStore, StoreConfig, Transition};
pub use supervisor::{
    ConnectionState, FeedEvent, Supervisor, SupervisorConfig, SupervisorHandle, SupervisorStatus,
};
pub use watchdog::Watchdog;
