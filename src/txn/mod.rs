// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Transaction memory pool and the transaction API itself (§4.6, §4.12, §6).

pub mod pool;
pub mod transaction;

pub use transaction::{Transaction, TransactionState};
