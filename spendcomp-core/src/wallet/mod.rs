pub mod config;
pub mod pool;

pub use config::{validate_classic_address, Credential, PrizeWalletConfig, MAX_PRIZE_WALLETS};
pub use pool::{WalletHandle, WalletPool, WalletStatus, TAG_MODULUS};
