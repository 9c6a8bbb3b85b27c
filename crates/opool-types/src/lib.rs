//! Foundation types for the object pool.
//!
//! This crate provides the identity and record types shared by the record
//! store, the scheduler-driven object pool, and the inspection CLI. Every
//! other opool crate depends on `opool-types`.
//!
//! # Key Types
//!
//! - [`Puuid`] -- Globally unique, immutable identity of a storable object
//! - [`Record`] -- Persisted form of one object: `{ id, type, <fields> }`
//! - [`ROOT_KEY`] -- Reserved store key holding the root object's puuid
//!
//! # Persisted format
//!
//! The backing store is a flat key to text mapping. The `"root"` key maps to
//! a puuid string; every other key is a puuid mapping to the JSON text of a
//! [`Record`]. References between records are written as reference markers
//! (`{"*": "<puuid>"}`), see [`record::ref_marker`].

pub mod error;
pub mod puuid;
pub mod record;

pub use error::TypeError;
pub use puuid::Puuid;
pub use record::{collect_ref_pids, marker_pid, ref_marker, Record, REF_KEY, ROOT_KEY};
