#![allow(clippy::result_large_err)]
//! # Registry Core
//!
//! Governance event processor for a token-curated newsroom registry.
//!
//! ## Architecture
//!
//! - **Events**: raw crawler events and their typed decoding
//! - **Processor**: the dispatcher and one handler per governance domain
//!   (listings, challenges and polls, appeals, parameterizer, government,
//!   token transfers, multisig wallets)
//! - **Watermark**: the `(timestamp, hashes)` cursor that makes each fetch
//!   idempotent
//! - **Chain**: on-chain proposal reads used to reconcile missing records
//! - **Store**: aggregate, event log and watermark ports with in-memory and
//!   Postgres adapters
//! - **Jobs**: polling and push drivers around one processing cycle
//! - **Telemetry**: structured logging, OTLP export and Prometheus metrics

pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod model;
pub mod processor;
pub mod store;
pub mod telemetry;
pub mod watermark;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, ProcessorError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::chain::{ChainReader, ProposalRecord, RpcChainReader};
    pub use crate::config::{BatchErrorPolicy, Config, ProcessorConfig, RunMode};
    pub use crate::error::{ErrorCode, ErrorContext, ProcessorError, Result};
    pub use crate::events::{Event, GovernanceEvent, Notification};
    pub use crate::jobs::{
        EventPipeline, InboundMessage, PollingDriver, PushDriver, RedisStreamSubscriber,
    };
    pub use crate::model::{
        Address, Amount, Appeal, Challenge, GovernanceState, GovernmentParameter,
        GovernmentParameterProposal, Listing, MultiSig, Parameter, ParameterProposal, Poll,
        ProposalId, TokenTransfer, UserChallengeData,
    };
    pub use crate::processor::{DispatchReport, Dispatcher, EventHandler};
    pub use crate::store::{AggregateStore, EventSource, InMemoryStore, PgStore, WatermarkStore};
    pub use crate::watermark::Watermark;
}
