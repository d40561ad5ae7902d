// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The rebalancer: crawler (§4.7) plus spread operator (§4.8).

pub mod crawler;
pub mod plan;
pub mod spread;

pub use crawler::acquire_window;
pub use plan::{Mode, Plan};
pub use spread::execute;
