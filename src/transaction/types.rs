/// Transaction types for Tallychain
use serde::{Deserialize, Serialize};

/// Sender recorded on the reward transaction credited to a miner.
pub const REWARD_SENDER: &str = "0";

/// Amount credited to the miner for each forged block.
pub const MINING_REWARD: f64 = 1.0;

/// A value transfer awaiting inclusion in, or embedded in, a block.
///
/// Transactions carry no identity of their own; they are only meaningful
/// as members of a block's ordered transaction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }

    /// The fixed reward credited to `node_id` when it forges a block.
    pub fn reward(node_id: &str) -> Self {
        Self::new(REWARD_SENDER, node_id, MINING_REWARD)
    }

    pub fn is_reward(&self) -> bool {
        self.sender == REWARD_SENDER
    }
}
