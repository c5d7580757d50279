pub mod auth;
pub mod hmac;
pub mod order;
pub mod wallet;

pub use auth::{build_clob_auth_signature, ClobAuthMessage};
pub use hmac::{ApiCredentials, HmacAuth};
pub use order::{build_signed_order, OrderData, SignedOrder};
pub use wallet::Wallet;
