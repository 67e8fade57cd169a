//! Domain types persisted by the storage backends.

mod identity;
mod token;
mod user;

pub use identity::Identity;
pub use token::{EXCHANGE_TOKEN_LIFESPAN, ExchangeToken, RefreshToken, generate_token, hash_token};
pub use user::{User, normalize_email};
