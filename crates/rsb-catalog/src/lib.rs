//! Pure catalog transformations: RMS rows in, commerce product aggregates out.
//!
//! Everything here is deterministic and I/O-free:
//! - [`size`]: canonical decimal size strings
//! - [`handle`]: URL-safe product slugs
//! - [`taxonomy`]: `(familia, categoria)` → standard taxonomy mapping
//! - [`grouper`]: CCOD grouping of item rows into product aggregates
//!
//! The sync pipeline is the only consumer; nothing in this crate talks to
//! the database or the commerce API.

pub mod grouper;
pub mod handle;
pub mod size;
pub mod taxonomy;
mod text;

pub use grouper::{group_rows, GroupWarning, GroupingOutcome, MAX_VARIANTS_PER_PRODUCT};
pub use handle::{derive_handle, numbered_handle};
pub use size::{normalize_size, NormalizedSize};
pub use taxonomy::{product_kind, TaxonomyResolver, TaxonomyResolution};
