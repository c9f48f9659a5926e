//! Tether sync engine.
//!
//! Links host records to references in external systems and runs
//! operator-authored sync scripts against a sandboxed evaluation context.
//!
//! - [`linker`]: the durable link registry
//! - [`context`]: per-job namespace assembly (helpers, configuration views,
//!   core and library code)
//! - [`sync`]: the three create-or-update sync primitives
//! - [`import`]: bundle import ("upgrade from source")
//! - [`engine`]: job activation and execution

pub mod bundle;
pub mod clock;
pub mod config;
pub mod context;
pub mod docs;
pub mod engine;
pub mod error;
pub mod http;
pub mod import;
pub mod jobs;
pub mod linker;
pub mod orders;
pub mod projects;
pub mod properties;
pub mod sync;
pub mod upsert;

pub use bundle::{Bundle, BundleFile, BundleSource, DirectorySource, GistSource, MemoryBundleSource};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use http::{HttpFetch, HttpResponse, StaticHttp, UreqFetch};
pub use import::Importer;
pub use jobs::{EnqueueOptions, JobLogger, JobQueue, LogEntry, MemoryQueue};
pub use linker::{LinkSet, Linker};
pub use orders::Orders;
pub use projects::{Operator, ProjectCounters, ProjectPatch, Projects};
pub use properties::{Properties, PropertyType};
pub use sync::{SyncMode, SyncReport};
