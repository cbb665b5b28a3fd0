//! Kiln - an asset pipeline.
//!
//! Resolves logical asset paths against an ordered list of load paths,
//! runs source files through per-type processor chains, concatenates
//! `require`d dependencies into bundles with merged source maps, and caches
//! every built asset keyed by the digest of what it depended on.
//!
//! ```ignore
//! let env = Environment::new(Config::default().with_load_path("app/assets"));
//! let asset = env.find_asset("application.js", ResolveOptions::default())?;
//! ```

#[macro_use]
pub mod logger;

pub mod asset;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod digest;
pub mod environment;
pub mod error;
pub mod export;
pub mod fs;
pub mod helpers;
pub mod mime;
pub mod path;
pub mod processor;
pub mod resolve;
pub mod source_map;
pub mod transform;
pub mod uri;

pub use asset::{Asset, Metadata};
pub use bundle::{Bundle, Reducer};
pub use cache::{CacheStore, FileStore, MemoryStore, NullStore};
pub use config::{Config, Settings};
pub use environment::{CachedEnvironment, Environment};
pub use error::{Error, Result};
pub use export::{Exporter, export_all};
pub use helpers::call_helper;
pub use processor::{Processor, ProcessorInput, ProcessorOutput, processor_fn};
pub use resolve::ResolveOptions;
pub use source_map::SourceMap;
pub use uri::AssetUri;
