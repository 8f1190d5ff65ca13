/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the ledger core.
//!
//! Other types, specific to single components, can be found in the modules of those components, e.g.,
//! [`crate::store::tx`] or [`crate::history`].

pub mod crypto_primitives;

pub mod data_types;

pub mod requests;
