use crate::transaction::Transaction;

/// Transactions submitted since the last forged block, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PendingTransactions {
    transactions: Vec<Transaction>,
}

impl PendingTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn as_slice(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Drain the whole buffer in one step, leaving it empty.
    pub fn take(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.transactions)
    }
}
