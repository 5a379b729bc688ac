pub mod manager;
pub mod record;

pub use manager::{WalManager, WalOptions};
pub use record::{Lsn, WalFrame, WalPayload};
