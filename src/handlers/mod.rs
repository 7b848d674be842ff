//! Conversion handlers and the dispatcher that routes jobs to them
//!
//! ## Key Components
//!
//! - [`Converter`] - Uniform contract every handler category implements
//! - [`Dispatcher`] - Validates a job against the format registry and invokes its handler
//! - [`HandlerSet`] - One converter per [`HandlerCategory`](crate::formats::HandlerCategory)
//! - [`ArchiveHandler`] - Archive-to-archive repackaging through a scratch workspace
//!
//! A timed-out job is cancelled through a `CancellationToken`; the dispatcher
//! waits for the handler to stop before discarding its output.
//!
//! ## Example
//!
//! ```rust,ignore
//! use convertbox::handlers::{ConversionJob, Dispatcher, HandlerSet};
//!
//! let dispatcher = Dispatcher::new(registry, HandlerSet::from_config(&tools, None), timeout);
//! let report = dispatcher.dispatch(&job).await?;
//! ```

mod archive;
mod cancel;
mod data;
mod document;
mod external;
mod image;
mod media;
mod registry;
mod traits;
pub(crate) mod types;

pub use archive::{ArchiveError, ArchiveFormat, ArchiveHandler, Workspace};
pub use data::DataHandler;
pub use document::DocumentHandler;
pub use external::ToolRunner;
pub use image::ImageHandler;
pub use media::MediaHandler;
pub use registry::{DispatchError, Dispatcher, HandlerSet};
pub use traits::{ConversionError, Converter};
pub use types::{ConversionJob, DispatchReport};
