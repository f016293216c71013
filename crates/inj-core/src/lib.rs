//! Injector Core Library
//!
//! This crate provides the host-agnostic engine behind the Injector extension:
//! per-domain user scripts that are stored (optionally compressed) and injected
//! into matching pages as they load.
//!
//! # Architecture
//!
//! A navigation event flows through a fixed pipeline:
//!
//! 1. `url` classifies the tab URL into a [`DomainKey`]
//! 2. `store` reads the persisted records
//! 3. `resolver` picks stored-or-default bodies, decompresses them and decides
//!    their timing
//! 4. `assembler` wraps each body into a self-contained, run-once code unit
//! 5. `injector` hands the units to the host's tab execution primitive
//!
//! The popup editor side lives in `popup`: a debounced, single-flight save
//! queue plus import/export of whole script bundles.
//!
//! Every browser collaborator (storage, tab execution, resource fetch) is a
//! trait, so the whole pipeline runs natively in tests.
//!
//! # Modules
//!
//! - `codec`: sentinel-prefixed LZ-String compression
//! - `url`: URL to domain key classification
//! - `types`: shared type definitions
//! - `store`: storage transport trait and script store
//! - `defaults`: compiled-in and fetched default scripts
//! - `resolver`: per-event script resolution
//! - `helper`: helper library namespace builder
//! - `assembler`: code unit assembly
//! - `injector`: background injection pipeline
//! - `popup`: editor persistence flow
//! - `config`: runtime configuration

pub mod assembler;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod helper;
pub mod injector;
pub mod popup;
pub mod resolver;
pub mod store;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use assembler::{assemble, CodeUnit};
pub use codec::{compress, decompress, encode_for_storage, CodecError, Encoded, COMPRESSION_HEADER};
pub use config::{EarlyEventPolicy, InjectorConfig};
pub use defaults::{
    load_defaults, load_script_defaults, DefaultScripts, DefaultsError, DefaultsState, FetchError, MapFetcher, ResourceFetcher,
};
pub use error::Error;
pub use helper::HelperLibrary;
pub use injector::{InjectionReport, Injector, RecordingExecutor, TabEvent, TabExecutor};
pub use popup::{decide_save, EditOutcome, ImportReport, LoadedScript, PopupSession, SaveDecision, SaveQueue, SaveStatus};
pub use resolver::{resolve, ResolvedBundle, ResolvedScript};
pub use store::{MemoryStorage, ScriptStore, StorageError, StorageTransport};
pub use types::{DomainKey, RunAt, ScriptRole, Slot, TabSnapshot, Timing};
pub use url::{classify, ClassifyError, Classified};
