//! Outgoing request assembly
//!
//! Builds the base URL, identity headers, and transport options for one
//! connection, including the fixed `.com:8443` port convention for
//! certificate-routed endpoints.

use std::collections::HashMap;

use url::Url;

use crate::config::{Config, ConnectionConfig};
use crate::transport::{ClientCertificate, TransportOptions};
use crate::{Error, Result};

/// Assembles requests for a single connection
pub struct RequestBuilder<'a> {
    connection: &'a ConnectionConfig,
    settings: &'a Config,
}

impl<'a> RequestBuilder<'a> {
    /// Create a builder for `connection` under the global settings
    #[must_use]
    pub fn new(connection: &'a ConnectionConfig, settings: &'a Config) -> Self {
        Self {
            connection,
            settings,
        }
    }

    /// Base URL for Apex calls.
    ///
    /// Trailing slashes are trimmed. Certificate-routed connections are
    /// pinned to port 8443 by rewriting the first `.com` unless the URI
    /// already encodes that port. The rewrite is a fixed Salesforce
    /// convention and applies to `.com` hosts only.
    #[must_use]
    pub fn base_url(&self) -> String {
        let mut apex_uri = self.connection.apex_uri.clone();
        if self.connection.has_certificate() && !apex_uri.contains(".com:8443") {
            apex_uri = apex_uri.replacen(".com", ".com:8443", 1);
        }
        apex_uri.trim_end_matches('/').to_string()
    }

    /// Identity headers for an Apex call.
    ///
    /// `x-app-uuid`/`x-app-key` are sent only when the connection carries
    /// both. `x-user-email` is the caller's email when set, else the
    /// connection's default, else omitted. `additional` entries are merged
    /// last and win on collision.
    #[must_use]
    pub fn headers(
        &self,
        caller_email: Option<&str>,
        additional: &HashMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();

        if self.connection.has_app_auth() {
            headers.push((
                "x-app-uuid".to_string(),
                self.connection.app_uuid.clone().unwrap_or_default(),
            ));
            headers.push((
                "x-app-key".to_string(),
                self.connection.app_key.clone().unwrap_or_default(),
            ));
        }

        let email = caller_email
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.connection
                    .default_user_email
                    .clone()
                    .filter(|email| !email.is_empty())
            });
        if let Some(email) = email {
            headers.push(("x-user-email".to_string(), email));
        }

        for (name, value) in additional {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        headers
    }

    /// Transport options for this connection.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when only one of the certificate pair is set, or
    /// when either referenced file does not exist under the configured
    /// certificates directory.
    pub fn transport_options(&self) -> Result<TransportOptions> {
        let certificate = self
            .connection
            .certificate
            .as_deref()
            .filter(|value| !value.is_empty());
        let certificate_key = self
            .connection
            .certificate_key
            .as_deref()
            .filter(|value| !value.is_empty());

        let (certificate, certificate_key) = match (certificate, certificate_key) {
            (None, None) => return Ok(TransportOptions::default()),
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(Error::Config(
                    "Both certificate and certificate_key must be provided".to_string(),
                ));
            }
        };

        let certificate = self.settings.certificates_dir.join(certificate);
        let certificate_key = self.settings.certificates_dir.join(certificate_key);
        for path in [&certificate, &certificate_key] {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Certificate file not found: {}",
                    path.display()
                )));
            }
        }

        Ok(TransportOptions {
            client_cert: Some(ClientCertificate {
                certificate: certificate.canonicalize()?,
                certificate_key: certificate_key.canonicalize()?,
                verbose: self.settings.debug,
            }),
        })
    }

    /// Full request URL.
    ///
    /// An absolute `path` is used verbatim; anything else is joined onto
    /// the base URL with redundant slashes stripped. Query parameters
    /// already encoded in `path` are merged with `query`, explicit
    /// entries winning on collision. The resulting query-string order is
    /// unspecified.
    pub fn full_url(&self, path: &str, query: &HashMap<String, String>) -> Result<String> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid request URL {raw}: {e}")))?;

        let mut merged: HashMap<String, String> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        for (key, value) in query {
            merged.insert(key.clone(), value.clone());
        }

        url.set_query(None);
        if !merged.is_empty() {
            url.query_pairs_mut().extend_pairs(merged.iter());
        }

        Ok(url.to_string())
    }
}
