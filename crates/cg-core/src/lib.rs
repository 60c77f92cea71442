//! Cheese Grinder Core Library
//!
//! This crate provides the moderation engine behind the Cheese Grinder comment
//! overlay. It is host agnostic: the page is reached through the [`Dom`] trait,
//! persistence through [`Storage`], time through [`Clock`] and file output
//! through [`Delivery`], so the same engine runs in the browser adapter and
//! under the arena DOM used by tests and benches.
//!
//! # Architecture
//!
//! Comment authors are only known from the host's network responses. The tap
//! forwards those payloads as channel messages, the identity index maps
//! comment keys to authors, and every DOM change requests a debounced
//! reconciliation pass that re-applies block and capture state to whatever is
//! currently rendered. Passes are idempotent: a second pass over an unchanged
//! page performs no DOM writes.
//!
//! # Modules
//!
//! - `tap`: Endpoint classification of intercepted responses
//! - `message`: Channel message and download request formats
//! - `identity`: Comment key to author index
//! - `store`: Block list, block details and capture collection with persistence
//! - `engine`: Per-page state machine driven by the host adapter
//! - `reconcile`: Idempotent re-application of moderation state onto the DOM
//! - `capture`: DOM preparation and restore around comment snapshots
//! - `chat`: Fail-open filtering of live chat frames
//! - `dom`: Host page abstraction plus an arena implementation
//! - `scheduler`: Debounce slot and one-shot timers
//! - `types`: Shared type definitions

pub mod artifact;
pub mod capture;
pub mod chat;
pub mod clock;
pub mod config;
pub mod dom;
pub mod engine;
pub mod identity;
pub mod location;
pub mod message;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod tap;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactData, ArtifactKind, Delivery, MemoryDelivery};
pub use capture::{CaptureError, CapturePhase, RenderError, RenderOptions, RenderRequest};
pub use chat::{filter_chat_text, filter_frame};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Labels, StorageKeys};
pub use dom::{Dom, DomError, HostPart, MemDom, MemNode};
pub use engine::Engine;
pub use identity::IdentityIndex;
pub use location::NativeBlockRequest;
pub use message::{BlockedIdsMessage, ClipMetadata, DownloadMessage, TapMessage};
pub use reconcile::PassReport;
pub use store::{
    BlockChange, BlockMetadata, BlockRecord, CaptureRecord, LedgerEntry, LedgerKind, MemoryStorage, ModerationStore,
    Storage, StorageError, StoreError,
};
pub use tap::{Endpoint, Navigation, Tap};
pub use types::{Action, ActionOutcome, CaptureMode, Effect, ExportSummary, Markers, NoticeLevel};
