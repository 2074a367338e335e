//! Per-block ledger result codes.

use std::fmt;

/// Outcome of applying one block to the ledger.
///
/// Only `Progress` mutates the store. The gap codes park the block in the
/// unchecked map; everything else is terminal for that submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Block applied.
    Progress,
    /// The previous block is unknown.
    GapPrevious,
    /// The source (linked send) block is unknown.
    GapSource,
    /// An epoch open is waiting on a pending entry for its account.
    GapEpochOpenPending,
    /// The block is already in the ledger.
    Old,
    BadSignature,
    /// A send that would increase the balance.
    NegativeSpend,
    /// The source block is not receivable by this account.
    Unreceivable,
    /// Another block already occupies this chain slot.
    Fork,
    /// Attempt to open a chain for the burn account.
    OpenedBurnAccount,
    /// A receive whose amount does not match the pending entry.
    BalanceMismatch,
    /// Representative change where none is allowed.
    RepresentativeMismatch,
    /// The block cannot follow its previous block (legacy after state).
    BlockPosition,
    InsufficientWork,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::GapPrevious => "gap_previous",
            Self::GapSource => "gap_source",
            Self::GapEpochOpenPending => "gap_epoch_open_pending",
            Self::Old => "old",
            Self::BadSignature => "bad_signature",
            Self::NegativeSpend => "negative_spend",
            Self::Unreceivable => "unreceivable",
            Self::Fork => "fork",
            Self::OpenedBurnAccount => "opened_burn_account",
            Self::BalanceMismatch => "balance_mismatch",
            Self::RepresentativeMismatch => "representative_mismatch",
            Self::BlockPosition => "block_position",
            Self::InsufficientWork => "insufficient_work",
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
