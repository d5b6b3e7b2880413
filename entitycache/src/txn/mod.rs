// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction predicates consumed by the cache
//!
//! The cache does not manage transactions. It only asks the calling transaction a few
//! questions before deciding whether a miss is worth scheduling.

/// View of the calling transaction
pub trait TransactionView {
    /// Whether the transaction has pending writes
    fn is_mutable(&self) -> bool;

    /// Whether the transaction reads the latest committed state
    fn is_current(&self) -> bool;

    /// Whether the transaction participates in caching at all
    ///
    /// Diagnostic and throwaway transactions answer `false`.
    fn is_caching_relevant(&self) -> bool;
}

/// Plain flags implementation of [`TransactionView`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnFlags {
    pub mutable: bool,
    pub current: bool,
    pub caching_relevant: bool,
}

impl TxnFlags {
    /// A current, read-only, caching-relevant transaction
    pub fn read_only() -> Self {
        Self {
            mutable: false,
            current: true,
            caching_relevant: true,
        }
    }

    /// A transaction carrying uncommitted writes
    pub fn mutable() -> Self {
        Self {
            mutable: true,
            ..Self::read_only()
        }
    }

    /// A read-only transaction pinned to an older state
    pub fn outdated() -> Self {
        Self {
            current: false,
            ..Self::read_only()
        }
    }

    pub fn with_caching_relevant(mut self, caching_relevant: bool) -> Self {
        self.caching_relevant = caching_relevant;
        self
    }
}

impl Default for TxnFlags {
    fn default() -> Self {
        Self::read_only()
    }
}

impl TransactionView for TxnFlags {
    fn is_mutable(&self) -> bool {
        self.mutable
    }

    fn is_current(&self) -> bool {
        self.current
    }

    fn is_caching_relevant(&self) -> bool {
        self.caching_relevant
    }
}

/// Whether a miss observed by `txn` may schedule background caching
pub fn may_schedule(txn: &dyn TransactionView) -> bool {
    !txn.is_mutable() && txn.is_current() && txn.is_caching_relevant()
}
