//! In-process fakes and harness for cross-crate scenario tests.
//!
//! The fakes implement the real collaborator seams ([`rsb_rms::RmsRepository`],
//! [`rsb_commerce::CommerceClient`], [`rsb_lock::LockStore`]) with
//! deterministic in-memory state and explicit failure injection, so whole
//! pipeline runs execute without a database, Redis, or network.

pub mod harness;
pub mod memory_commerce;
pub mod memory_rms;

pub use harness::{item_row, TestHarness};
pub use memory_commerce::MemoryCommerce;
pub use memory_rms::MemoryRms;
