//! # asmcat-core
//!
//! A library for cataloguing the public surface of .NET assemblies.
//!
//! This crate provides the core functionality for:
//! - Reading ECMA-335 metadata from PE images with dotscope, without a runtime
//! - Answering reflection questions (public members, inherited members,
//!   accessor visibility) from the metadata tables
//! - Filtering and formatting types and members into report rows
//! - Writing those rows as `;`-separated text
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`image`]: Assembly loading, metadata records and signatures
//! - [`reflect`]: Reflection model and the metadata-backed reflector
//! - [`catalog`]: Type walking, filtering and signature formatting
//! - [`report`]: Report rows and the delimited-text writer
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use asmcat_core::{AssemblyImage, AssemblyResolver, MetadataReflector};
//! use asmcat_core::{CatalogConfig, ReportWriter, TypeWalker};
//! use std::path::Path;
//!
//! let image = AssemblyImage::from_path("cYo.Common.dll")?;
//! let mut reflector = MetadataReflector::new(image, AssemblyResolver::new());
//!
//! let rows = TypeWalker::new(CatalogConfig::default()).walk(&mut reflector)?;
//! ReportWriter::new().write_file(&rows, Path::new("cYo.Common.csv"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! [`ReflectionSource`] decouples the walker from metadata decoding; any
//! type able to list reflected types can be catalogued.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod catalog;
pub mod error;
pub mod image;
pub mod reflect;
pub mod report;

// Re-export primary types for convenience
pub use catalog::{CatalogConfig, SignatureFormatter, TypeWalker};
pub use error::{Error, Result};
pub use image::{AssemblyImage, AssemblyResolver};
pub use reflect::{MetadataReflector, ReflectedType, ReflectionSource, TypeSig};
pub use report::{ReportRow, ReportWriter};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
