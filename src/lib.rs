//! Salesforce Apex REST client
//!
//! An authenticated HTTP facade over Salesforce Apex REST endpoints.
//!
//! # Features
//!
//! - **Token Lifecycle**: OAuth2 password-grant tokens, cached per
//!   connection with single-flight issuance
//! - **Multi-Connection**: named connections with environment-conditional
//!   selection and fallback
//! - **Retry on 401**: one transparent token refresh and resend
//! - **mTLS**: client-certificate connections with the fixed `:8443`
//!   port convention
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use salesforce_apex::{ApexGateway, Config};
//!
//! # async fn run() -> salesforce_apex::Result<()> {
//! let config = Config::load(Some(std::path::Path::new("salesforce.yaml")))?;
//! let gateway = ApexGateway::from_config(config)?;
//!
//! gateway.set_email("caller@example.com");
//! let response = gateway
//!     .get("/orders", &HashMap::new(), &HashMap::new())
//!     .await?;
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod request;
pub mod token;
pub mod transport;

pub use config::{Config, ConnectionConfig};
pub use error::{ApiFailure, Error, RequestContext, Result};
pub use gateway::ApexGateway;
pub use registry::ConnectionRegistry;
pub use token::TokenCache;
pub use transport::{Method, Transport, TransportResponse};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
