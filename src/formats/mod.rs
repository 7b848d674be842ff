//! Format compatibility matrix and input-extension detection.
//!
//! - [`FormatRegistry`] maps an input extension to the output extensions it
//!   may be converted to, each bound to a [`HandlerCategory`].
//! - [`resolve_extension`] picks the canonical input extension for a
//!   filename, preferring compound keys such as `.tar.gz`.

mod registry;
mod resolver;

pub(crate) use registry::OFFICE_SUITE;
pub use registry::{FormatEntry, FormatRegistry, HandlerCategory, TargetMap};
pub use resolver::{normalize_extension, resolve_extension};
