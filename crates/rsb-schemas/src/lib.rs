//! Shared data model for the retail sync bridge.
//!
//! Every crate in the workspace speaks these types:
//! - RMS read/write rows (`ItemRow`, `OrderHeader`, `OrderLine`)
//! - the in-memory product aggregate built per batch (`Product`, `Variant`)
//! - remote commerce shapes (`RemoteProduct`, `CommerceOrder`, …)
//! - checkpoints and run summaries
//! - the classified error type (`SyncError`) used on every fallible seam
//!
//! This crate has no I/O and no async; it depends only on serde, chrono,
//! rust_decimal and uuid.

pub mod checkpoint;
pub mod commerce;
pub mod error;
pub mod item;
pub mod order;
pub mod product;
pub mod summary;

pub use checkpoint::{ProgressCheckpoint, UpdateCheckpoint, UPDATE_CHECKPOINT_VERSION};
pub use commerce::{
    CommerceAddress, CommerceLineItem, CommerceOrder, Location, MoneySet, RemoteProduct,
    RemoteVariant,
};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use item::{CustomerDraft, ItemRow, OrderHeader, OrderLine, ORDER_CHANNEL_ONLINE, ORDER_TYPE_SALE};
pub use order::{IngestOutcome, RejectReason};
pub use product::{
    AttributeBag, DiscountSpec, Metafield, MetafieldType, Product, ProductKind, ProductStatus,
    Variant,
};
pub use summary::{ErrorSample, ProductOutcome, RunSummary, SkipReason, SyncStats};
