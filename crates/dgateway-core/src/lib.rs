//! dGateway Core Library
//!
//! Core types and engines for the dGateway capture-and-replay proxy.
//! This crate holds everything that does not depend on a network framework:
//! the network listeners live in the `dgateway` binary.
//!
//! # Modules
//!
//! - [`headers`] - Header multimap stored alongside each exchange
//! - [`classify`] - Text/binary body classification
//! - [`codec`] - Gzip decoding for stored bodies
//! - [`exchange`] - Exchange records and stored views
//! - [`recording`] - Shared recording on/off state
//! - [`pipeline`] - Bounded persistence queue and its single writer
//! - [`storage`] - SQLite exchange store
//! - [`migrations`] - Additive schema migrations
//! - [`query`] - List filters and paging
//! - [`har`] - HAR 1.2 export
//! - [`error`] - Error types

pub mod classify;
pub mod codec;
pub mod defaults;
pub mod error;
pub mod exchange;
pub mod har;
pub mod headers;
pub mod migrations;
pub mod pipeline;
pub mod query;
pub mod recording;
pub mod storage;

// Re-export commonly used types
pub use classify::{classify, BodyKind};
pub use codec::{decompress_gzip, inflate_if_gzip, CodecError};
pub use error::{AppError, Result};
pub use exchange::{
    BodyFacet, Capture, ExchangeMetadata, ExchangeRecord, ExchangeSummary, StoredBody,
    StoredExchange,
};
pub use har::{build_har, Har};
pub use headers::HeaderMultimap;
pub use migrations::MigrationReport;
pub use pipeline::{
    capture_channel, CaptureConsumer, CaptureQueue, CaptureSlot, EnqueueOutcome, ExchangeWriter,
    PipelineStats,
};
pub use query::{ExchangePage, ListQuery};
pub use recording::{RecordingState, RecordingStatus};
pub use storage::ExchangeStore;
