//! Previewly-Common: shared error type and identifiers.
//!
//! - **Errors**: the unified [`Error`] every previewly crate funnels into,
//!   with an HTTP status mapping for the API layer.
//! - **Typed IDs**: [`PreviewId`], the opaque handle of a preview session.
//!
//! # Examples
//!
//! ```
//! use previewly_common::{Error, PreviewId, Result};
//!
//! let id = PreviewId::new();
//! assert!(id.to_string().starts_with("preview_"));
//!
//! fn lookup(id: PreviewId) -> Result<()> {
//!     Err(Error::not_found("session", id))
//! }
//! assert_eq!(lookup(id).unwrap_err().http_status(), 404);
//! ```

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::*;
