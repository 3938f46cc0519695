//! # tpmgen — TPM 2.0 client library generator
//!
//! Turns the tabular description of the TPM 2.0 wire protocol (structure, union, constant and
//! command tables) into client libraries that marshal the wire format and dispatch typed
//! commands.
//!
//! ## Pipeline
//!
//! 1. **Raw tables** ([`raw`]): `{captionText, commentText, rows, numHandles}` records, as JSON.
//! 2. **Extraction** ([`extract`]): tables are classified by caption and rows by shape
//!    ([`classify`]); `!ALG` template tables are expanded per algorithm ([`algmacro`]). The
//!    result is a [`Registry`] of typed nodes ([`ast`]).
//! 3. **Normalization** ([`normalize`]): wrapper structures are flattened into their users,
//!    special layouts are marked, and union collisions are split; [`lint`] then checks the
//!    structural invariants.
//! 4. **Adaptation** ([`adapt`]): a clone of the registry is rewritten for one target language.
//! 5. **Emission** ([`backend`]): a backend turns the adapted registry into source files.
//!
//! Constant expressions ([`expr`], tokenized by the pest grammar in [`parser`]) and value
//! constraints ([`domain`]) are kept as text and evaluated against the registry on demand.
//!
//! ## Marshaling rules
//!
//! Every structure field carries a [`MarshalType`](ast::MarshalType). [`wire::layout`] turns a
//! structure's fields into a marshaling plan; the backends emit code from it and the
//! reference [`Codec`] encodes and decodes [`Value`] trees with it.
//!
//! ## Example
//!
//! ```no_run
//! use tpmgen::{adapt, backend, extract, normalize, GeneratorConfig, Lang};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tables = tpmgen::raw::load_tables(std::path::Path::new("tables"))?;
//! let config = GeneratorConfig::default();
//! let (mut registry, _report) = extract(&tables, &config)?;
//! normalize(&mut registry, &config)?;
//! let node = adapt(&registry, Lang::Node)?;
//! let files = backend::generate(&node, &backend::TypeScriptBackend)?;
//! files.write_to(std::path::Path::new("generated/node"))?;
//! # Ok(())
//! # }
//! ```

pub mod adapt;
pub mod algmacro;
pub mod ast;
pub mod backend;
pub mod classify;
pub mod codec;
pub mod config;
pub mod domain;
pub mod dump;
pub mod error;
pub mod expr;
pub mod extract;
pub mod lint;
pub mod normalize;
pub mod parser;
pub mod raw;
pub mod registry;
pub mod value;
pub mod wire;

pub use adapt::{adapt, Lang};
pub use codec::{Codec, CodecError};
pub use config::GeneratorConfig;
pub use error::{GenError, Result};
pub use expr::evaluate;
pub use extract::{extract, ExtractReport};
pub use normalize::normalize;
pub use raw::RawTable;
pub use registry::Registry;
pub use value::Value;
