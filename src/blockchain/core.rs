// core.rs splits ledger responsibilities into submodules: block and chain
// state, the pending-transaction buffer, and chain validation.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
