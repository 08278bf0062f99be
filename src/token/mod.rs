//! Token lifecycle: OAuth2 issuance and per-connection caching

mod cache;
mod issuer;

pub use cache::TokenCache;
pub use issuer::TokenIssuer;
