//! The ledger engine: applies blocks to the store and rolls them back.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use quill_crypto::{verify_signature, KeyPair};
use quill_store::{
    AccountInfo, BlockRecord, ConfirmationHeightInfo, PendingInfo, PendingKey, Sideband, Store,
    Transaction, WriteTransaction,
};
use quill_types::stream::StreamReader;
use quill_types::{Account, Amount, BlockHash, QualifiedRoot};

use crate::block::{Block, SavedBlock, StateBlock};
use crate::error::LedgerError;
use crate::status::BlockStatus;
use crate::work::WorkThresholds;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Applies blocks to the store under a write transaction and answers the
/// dependency questions the rest of the pipeline asks.
pub struct Ledger {
    pub store: Arc<Store>,
    work: WorkThresholds,
}

impl Ledger {
    pub fn new(store: Arc<Store>, work: WorkThresholds) -> Self {
        Self { store, work }
    }

    /// Write the genesis block directly, bypassing the normal rules.
    /// The genesis account receives the entire supply from nowhere.
    pub fn initialize(&self, tx: &WriteTransaction, genesis: &KeyPair) {
        let block = StateBlock::new(
            genesis.public,
            BlockHash::ZERO,
            genesis.public,
            Amount::MAX,
            quill_types::HashOrAccount::ZERO,
            genesis,
            quill_types::WorkNonce(0),
        );
        let hash = block.hash();
        let sideband = Sideband {
            height: 1,
            timestamp: now_secs(),
            successor: BlockHash::ZERO,
            account: genesis.public,
            balance: Amount::MAX,
            is_send: false,
            is_receive: false,
        };
        let mut bytes = Vec::new();
        block.serialize_with_type(&mut bytes);
        self.store
            .blocks
            .put(tx, &hash, &BlockRecord { bytes, sideband });
        self.store.accounts.put(
            tx,
            &genesis.public,
            &AccountInfo {
                head: hash,
                open_block: hash,
                representative: genesis.public,
                balance: Amount::MAX,
                modified: now_secs(),
                block_count: 1,
            },
        );
        self.store.confirmation_height.put(
            tx,
            &genesis.public,
            &ConfirmationHeightInfo {
                height: 1,
                frontier: hash,
            },
        );
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn block(&self, tx: &impl Transaction, hash: &BlockHash) -> Option<SavedBlock> {
        let record = self.store.blocks.get(tx, hash)?;
        let mut reader = StreamReader::new(&record.bytes);
        let block = Block::deserialize_with_type(&mut reader).ok()??;
        Some(SavedBlock {
            block: Arc::new(block),
            sideband: record.sideband,
        })
    }

    pub fn block_exists(&self, tx: &impl Transaction, hash: &BlockHash) -> bool {
        self.store.blocks.exists(tx, hash)
    }

    /// The account owning `hash`; zero when the block is unknown.
    pub fn account_safe(&self, tx: &impl Transaction, hash: &BlockHash) -> Account {
        self.block(tx, hash)
            .map(|saved| saved.account())
            .unwrap_or(Account::ZERO)
    }

    pub fn account_info(&self, tx: &impl Transaction, account: &Account) -> Option<AccountInfo> {
        self.store.accounts.get(tx, account)
    }

    pub fn balance(&self, tx: &impl Transaction, hash: &BlockHash) -> Option<Amount> {
        self.block(tx, hash).map(|saved| saved.balance())
    }

    pub fn is_send(&self, tx: &impl Transaction, hash: &BlockHash) -> bool {
        self.block(tx, hash)
            .map(|saved| saved.sideband.is_send)
            .unwrap_or(false)
    }

    /// The destination account of a send block, if it is one.
    pub fn send_destination(&self, saved: &SavedBlock) -> Option<Account> {
        if !saved.sideband.is_send {
            return None;
        }
        match saved.block.as_ref() {
            Block::Send(b) => Some(b.destination),
            Block::State(b) => Some(b.link.as_account()),
            _ => None,
        }
    }

    pub fn block_confirmed(&self, tx: &impl Transaction, hash: &BlockHash) -> bool {
        let Some(saved) = self.block(tx, hash) else {
            return false;
        };
        let info = self
            .store
            .confirmation_height
            .get(tx, &saved.account())
            .unwrap_or_default();
        info.height >= saved.height()
    }

    /// Hashes this block depends on: previous and, for receives, the source.
    pub fn dependent_blocks(&self, saved: &SavedBlock) -> [BlockHash; 2] {
        let source = if saved.sideband.is_receive {
            saved.block.source_or_link()
        } else {
            BlockHash::ZERO
        };
        [saved.block.previous(), source]
    }

    /// Whether every dependency of `saved` is confirmed.
    pub fn dependents_confirmed(&self, tx: &impl Transaction, saved: &SavedBlock) -> bool {
        self.dependent_blocks(saved)
            .iter()
            .filter(|hash| !hash.is_zero())
            .all(|hash| self.block_confirmed(tx, hash))
    }

    /// The block currently occupying a chain slot, if any.
    pub fn successor(&self, tx: &impl Transaction, root: &QualifiedRoot) -> Option<SavedBlock> {
        if root.previous.is_zero() {
            let account = Account::from_bytes(*root.root.as_bytes());
            let info = self.store.accounts.get(tx, &account)?;
            self.block(tx, &info.open_block)
        } else {
            let successor = self.store.blocks.successor(tx, &root.previous)?;
            self.block(tx, &successor)
        }
    }

    /// Mark `hash` (and everything below it) confirmed. Cementing proper is
    /// driven by consensus; the pipeline and tests use this entry point.
    pub fn confirm(&self, tx: &WriteTransaction, hash: &BlockHash) {
        if let Some(saved) = self.block(tx, hash) {
            let account = saved.account();
            let current = self
                .store
                .confirmation_height
                .get(tx, &account)
                .unwrap_or_default();
            if saved.height() > current.height {
                self.store.confirmation_height.put(
                    tx,
                    &account,
                    &ConfirmationHeightInfo {
                        height: saved.height(),
                        frontier: *hash,
                    },
                );
            }
        }
    }

    // ── Process ─────────────────────────────────────────────────────────

    /// Apply one block. Only `Progress` mutates the store.
    pub fn process(&self, tx: &WriteTransaction, block: &Arc<Block>) -> BlockStatus {
        let hash = block.hash();
        if self.store.blocks.exists(tx, &hash) {
            return BlockStatus::Old;
        }
        if !self.work.validate(block) {
            return BlockStatus::InsufficientWork;
        }
        match block.as_ref() {
            Block::State(state) => self.process_state(tx, block, state, hash),
            Block::Send(_) | Block::Receive(_) | Block::Change(_) => {
                self.process_legacy(tx, block, hash)
            }
            Block::Open(_) => self.process_open(tx, block, hash),
        }
    }

    fn process_state(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        state: &StateBlock,
        hash: BlockHash,
    ) -> BlockStatus {
        if state.previous.is_zero() && state.account == Account::BURN {
            return BlockStatus::OpenedBurnAccount;
        }
        if !verify_signature(hash.as_bytes(), &state.signature, &state.account) {
            return BlockStatus::BadSignature;
        }

        let info = self.store.accounts.get(tx, &state.account);
        let previous = match (&info, state.previous.is_zero()) {
            (Some(info), false) => {
                let Some(previous) = self.block(tx, &state.previous) else {
                    return BlockStatus::GapPrevious;
                };
                if state.previous != info.head {
                    return BlockStatus::Fork;
                }
                Some(previous)
            }
            (Some(_), true) => return BlockStatus::Fork, // second open for the account
            (None, false) => return BlockStatus::GapPrevious,
            (None, true) => None,
        };

        let previous_balance = previous
            .as_ref()
            .map(|saved| saved.balance())
            .unwrap_or(Amount::ZERO);

        let mut is_send = false;
        let mut is_receive = false;
        let mut pending_to_remove: Option<PendingKey> = None;
        let mut pending_to_add: Option<(PendingKey, PendingInfo)> = None;

        if state.balance < previous_balance {
            is_send = true;
            let amount = previous_balance - state.balance;
            let destination = state.link.as_account();
            if !destination.is_zero() {
                pending_to_add = Some((
                    PendingKey::new(destination, hash),
                    PendingInfo {
                        source: state.account,
                        amount,
                    },
                ));
            }
        } else if !state.link.is_zero() {
            // Balance did not decrease and a link is present: a receive.
            let source = state.link.as_block_hash();
            if !self.store.blocks.exists(tx, &source) {
                return BlockStatus::GapSource;
            }
            let key = PendingKey::new(state.account, source);
            let Some(pending) = self.store.pending.get(tx, &key) else {
                return BlockStatus::Unreceivable;
            };
            let amount = state.balance - previous_balance;
            if pending.amount != amount {
                return BlockStatus::BalanceMismatch;
            }
            is_receive = true;
            pending_to_remove = Some(key);
        } else if state.balance > previous_balance {
            // Funds appearing with no source.
            return BlockStatus::BalanceMismatch;
        }

        self.apply(
            tx,
            block,
            hash,
            state.account,
            state.balance,
            state.representative,
            is_send,
            is_receive,
            info,
        );
        if let Some(key) = pending_to_remove {
            self.store.pending.del(tx, &key);
        }
        if let Some((key, pending)) = pending_to_add {
            self.store.pending.put(tx, &key, &pending);
        }
        BlockStatus::Progress
    }

    fn process_legacy(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        hash: BlockHash,
    ) -> BlockStatus {
        let Some(previous) = self.block(tx, &block.previous()) else {
            return BlockStatus::GapPrevious;
        };
        if previous.block.block_type() == crate::block::BlockType::State {
            return BlockStatus::BlockPosition;
        }
        let account = previous.account();
        if !verify_signature(hash.as_bytes(), block.signature(), &account) {
            return BlockStatus::BadSignature;
        }
        let info = self
            .store
            .accounts
            .get(tx, &account)
            .expect("previous block exists, so its account must");
        if block.previous() != info.head {
            return BlockStatus::Fork;
        }

        match block.as_ref() {
            Block::Send(send) => {
                if send.balance > previous.balance() {
                    return BlockStatus::NegativeSpend;
                }
                let amount = previous.balance() - send.balance;
                self.apply(
                    tx,
                    block,
                    hash,
                    account,
                    send.balance,
                    info.representative,
                    true,
                    false,
                    Some(info),
                );
                self.store.pending.put(
                    tx,
                    &PendingKey::new(send.destination, hash),
                    &PendingInfo {
                        source: account,
                        amount,
                    },
                );
                BlockStatus::Progress
            }
            Block::Receive(receive) => {
                if !self.store.blocks.exists(tx, &receive.source) {
                    return BlockStatus::GapSource;
                }
                let key = PendingKey::new(account, receive.source);
                let Some(pending) = self.store.pending.get(tx, &key) else {
                    return BlockStatus::Unreceivable;
                };
                let balance = previous.balance() + pending.amount;
                self.apply(
                    tx,
                    block,
                    hash,
                    account,
                    balance,
                    info.representative,
                    false,
                    true,
                    Some(info),
                );
                self.store.pending.del(tx, &key);
                BlockStatus::Progress
            }
            Block::Change(change) => {
                self.apply(
                    tx,
                    block,
                    hash,
                    account,
                    previous.balance(),
                    change.representative,
                    false,
                    false,
                    Some(info),
                );
                BlockStatus::Progress
            }
            _ => unreachable!("dispatched in process()"),
        }
    }

    fn process_open(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        hash: BlockHash,
    ) -> BlockStatus {
        let Block::Open(open) = block.as_ref() else {
            unreachable!("dispatched in process()");
        };
        if open.account == Account::BURN {
            return BlockStatus::OpenedBurnAccount;
        }
        if !verify_signature(hash.as_bytes(), &open.signature, &open.account) {
            return BlockStatus::BadSignature;
        }
        if self.store.accounts.exists(tx, &open.account) {
            return BlockStatus::Fork;
        }
        if !self.store.blocks.exists(tx, &open.source) {
            return BlockStatus::GapSource;
        }
        let key = PendingKey::new(open.account, open.source);
        let Some(pending) = self.store.pending.get(tx, &key) else {
            return BlockStatus::Unreceivable;
        };
        self.apply(
            tx,
            block,
            hash,
            open.account,
            pending.amount,
            open.representative,
            false,
            true,
            None,
        );
        self.store.pending.del(tx, &key);
        BlockStatus::Progress
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        tx: &WriteTransaction,
        block: &Arc<Block>,
        hash: BlockHash,
        account: Account,
        balance: Amount,
        representative: Account,
        is_send: bool,
        is_receive: bool,
        info: Option<AccountInfo>,
    ) {
        let previous_height = if block.previous().is_zero() {
            0
        } else {
            self.block(tx, &block.previous())
                .map(|previous| previous.height())
                .unwrap_or(0)
        };
        let height = previous_height + 1;

        let sideband = Sideband {
            height,
            timestamp: now_secs(),
            successor: BlockHash::ZERO,
            account,
            balance,
            is_send,
            is_receive,
        };
        let mut bytes = Vec::new();
        block.serialize_with_type(&mut bytes);
        self.store
            .blocks
            .put(tx, &hash, &BlockRecord { bytes, sideband });

        let previous = block.previous();
        if !previous.is_zero() {
            self.store.blocks.set_successor(tx, &previous, hash);
        }

        let open_block = info
            .as_ref()
            .map(|i| i.open_block)
            .unwrap_or(hash);
        let block_count = info.as_ref().map(|i| i.block_count).unwrap_or(0) + 1;
        self.store.accounts.put(
            tx,
            &account,
            &AccountInfo {
                head: hash,
                open_block,
                representative,
                balance,
                modified: now_secs(),
                block_count,
            },
        );
    }

    // ── Rollback ────────────────────────────────────────────────────────

    /// Roll back `hash` and everything above it in its account chain,
    /// recursing into dependent receives on other chains.
    ///
    /// Fails without touching anything further if any block to be removed
    /// is already confirmed. Returns the removed blocks, heads first.
    pub fn rollback(
        &self,
        tx: &WriteTransaction,
        hash: &BlockHash,
    ) -> Result<Vec<SavedBlock>, LedgerError> {
        let mut rolled_back = Vec::new();
        self.rollback_inner(tx, hash, &mut rolled_back)?;
        Ok(rolled_back)
    }

    fn rollback_inner(
        &self,
        tx: &WriteTransaction,
        hash: &BlockHash,
        list: &mut Vec<SavedBlock>,
    ) -> Result<(), LedgerError> {
        let target = self
            .block(tx, hash)
            .ok_or(LedgerError::BlockNotFound(*hash))?;
        let account = target.account();

        while self.store.blocks.exists(tx, hash) {
            let info = self
                .store
                .accounts
                .get(tx, &account)
                .ok_or(LedgerError::BlockNotFound(*hash))?;
            let head = self
                .block(tx, &info.head)
                .ok_or(LedgerError::CorruptBlock(info.head))?;
            self.rollback_one(tx, &head, &info, list)?;
        }
        Ok(())
    }

    fn rollback_one(
        &self,
        tx: &WriteTransaction,
        head: &SavedBlock,
        info: &AccountInfo,
        list: &mut Vec<SavedBlock>,
    ) -> Result<(), LedgerError> {
        let hash = head.hash();
        let account = head.account();

        let conf = self
            .store
            .confirmation_height
            .get(tx, &account)
            .unwrap_or_default();
        if conf.height >= head.height() {
            return Err(LedgerError::RollbackConfirmed(hash));
        }

        if head.sideband.is_send {
            let destination = self
                .send_destination(head)
                .expect("send sideband implies a destination");
            let key = PendingKey::new(destination, hash);
            if !self.store.pending.exists(tx, &key) {
                // Already received; the receive must go first.
                if let Some(receive_hash) = self.find_receive(tx, &destination, &hash) {
                    self.rollback_inner(tx, &receive_hash, list)?;
                }
            }
            self.store.pending.del(tx, &key);
        }

        if head.sideband.is_receive {
            let source = head.block.source_or_link();
            let amount = match self.block(tx, &head.block.previous()) {
                Some(previous) => head.balance() - previous.balance(),
                None => head.balance(),
            };
            let source_account = self.account_safe(tx, &source);
            self.store.pending.put(
                tx,
                &PendingKey::new(account, source),
                &PendingInfo {
                    source: source_account,
                    amount,
                },
            );
        }

        self.store.blocks.del(tx, &hash);
        let previous_hash = head.block.previous();
        if previous_hash.is_zero() {
            self.store.accounts.del(tx, &account);
        } else {
            let previous = self
                .block(tx, &previous_hash)
                .ok_or(LedgerError::CorruptBlock(previous_hash))?;
            self.store.blocks.set_successor(tx, &previous_hash, BlockHash::ZERO);
            self.store.accounts.put(
                tx,
                &account,
                &AccountInfo {
                    head: previous_hash,
                    open_block: info.open_block,
                    representative: self.representative_for(tx, &previous),
                    balance: previous.balance(),
                    modified: now_secs(),
                    block_count: info.block_count.saturating_sub(1),
                },
            );
        }

        list.push(head.clone());
        Ok(())
    }

    /// Find the block on `account`'s chain that received `send_hash`.
    fn find_receive(
        &self,
        tx: &impl Transaction,
        account: &Account,
        send_hash: &BlockHash,
    ) -> Option<BlockHash> {
        let info = self.store.accounts.get(tx, account)?;
        let mut current = info.head;
        while !current.is_zero() {
            let saved = self.block(tx, &current)?;
            if saved.sideband.is_receive && saved.block.source_or_link() == *send_hash {
                return Some(current);
            }
            current = saved.block.previous();
        }
        None
    }

    /// The representative in effect as of `saved` (walking back to the
    /// nearest block carrying a representative field).
    fn representative_for(&self, tx: &impl Transaction, saved: &SavedBlock) -> Account {
        let mut current = saved.clone();
        loop {
            if let Some(representative) = current.block.representative() {
                return representative;
            }
            match self.block(tx, &current.block.previous()) {
                Some(previous) => current = previous,
                None => return Account::ZERO,
            }
        }
    }
}
