// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Teseo: an in-memory, multi-versioned graph storage engine.
//!
//! ##### About
//!
//! A `Teseo` engine holds a single directed, weighted graph, versioned with
//! snapshot-isolation MVCC so concurrent readers never block writers and
//! writers never block readers. The keyspace (vertex and edge records) is
//! held in a two-level index — a skiplist of *leaves*, each a fixed array of
//! *segments* — so that inserts land near their neighbours without a single
//! engine-wide write lock. Segments that fill up are rebalanced by a crawler
//! that widens a window around the hot segment and redistributes its
//! contents (spreading, or splitting the leaf if spreading isn't enough).
//!
//! Besides the live, versioned store, the engine also maintains an
//! *auxiliary view*: a read-optimized, array-backed snapshot used to answer
//! whole-graph queries (vertex/edge counts, dense `logical_id` numbering)
//! without walking the sparse array. A background merger service keeps a
//! vertex-to-segment lookup table warm and prunes undo chains that no active
//! transaction can still observe.
//!
//! # Example usage
//!
//! ```
//! use teseo::Config;
//!
//! let engine = Config::new().open();
//! let ctx = engine.register_thread();
//!
//! let txn = engine.start_transaction(&ctx, false);
//! txn.insert_vertex(1).unwrap();
//! txn.insert_vertex(2).unwrap();
//! txn.insert_edge(1, 2, 4.5).unwrap();
//! txn.commit().unwrap();
//!
//! let reader = engine.start_transaction(&ctx, true);
//! assert!(reader.has_edge(1, 2));
//! assert_eq!(reader.get_weight(1, 2).unwrap(), 4.5);
//! reader.commit().unwrap();
//!
//! engine.unregister_thread(ctx);
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod aux;
mod config;
mod cursor;
mod engine;
mod error;

#[doc(hidden)]
pub mod file;

mod index;
mod key;
mod latch;
mod leaf;
mod merger;
mod numa;

#[doc(hidden)]
pub mod rebalance;

#[doc(hidden)]
pub mod segment;

mod seqno;
mod thread_context;
mod txn;
mod value;
mod version;
mod vertex_table;

pub use aux::AuxView;
pub use config::Config;
pub use engine::Teseo;
pub use error::{Error, LogicalError, Result};
pub use key::{external_to_internal, internal_to_external};
pub use seqno::{HighWaterMark, SequenceNumberCounter};
pub use thread_context::ThreadContext;
pub use txn::{Transaction, TransactionState};
pub use value::{EdgeRecord, VertexRecord, Weight};
