//! HTTP transport abstraction
//!
//! The gateway talks to Salesforce through the [`Transport`] trait so the
//! token lifecycle and request policy can be tested without a network.
//! [`HttpTransport`] is the production implementation over `reqwest`,
//! including client-certificate identities for mTLS connections.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::Result;

/// The closed set of HTTP verbs the Apex gateway supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP PATCH
    Patch,
    /// HTTP DELETE
    Delete,
}

impl Method {
    /// Lowercase method name, as used in logs and failure context
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
        }
    }
}

/// Client certificate options for a certificate-routed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    /// Absolute path to the PEM-encoded certificate file
    pub certificate: PathBuf,
    /// Absolute path to the PEM-encoded private key file
    pub certificate_key: PathBuf,
    /// Emit verbose transport diagnostics for this request
    pub verbose: bool,
}

/// Per-request transport options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Client certificate identity, when the connection is certificate-routed
    pub client_cert: Option<ClientCertificate>,
}

/// Request body variants supported by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// JSON payload
    Json(Value),
    /// Form-encoded pairs (token issuance)
    Form(Vec<(String, String)>),
}

/// A fully assembled outgoing request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP verb
    pub method: Method,
    /// Full request URL, query string included
    pub url: String,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Optional body
    pub body: Option<RequestBody>,
    /// Transport options
    pub options: TransportOptions,
}

/// A raw response, returned to callers unmodified
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: String,
}

impl TransportResponse {
    /// Status is in [200, 300)
    #[must_use]
    pub fn successful(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Status is 401
    #[must_use]
    pub fn unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Status is outside [200, 300)
    #[must_use]
    pub fn failed(&self) -> bool {
        !self.successful()
    }

    /// Parse the body as JSON, `None` when it is not valid JSON
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// External collaborator performing the actual network calls
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and return the raw response.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport-level failures (connection
    /// errors, timeouts); non-2xx statuses are returned as responses.
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Production transport over `reqwest`
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    /// Identity-bearing clients keyed by certificate path, built lazily
    cert_clients: DashMap<PathBuf, Client>,
}

impl HttpTransport {
    /// Create a transport applying `timeout` to every request
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout,
            cert_clients: DashMap::new(),
        })
    }

    /// Client to use for the given options, building and caching an
    /// identity-bearing client when a certificate is attached.
    fn client_for(&self, options: &TransportOptions) -> Result<Client> {
        let Some(cert) = &options.client_cert else {
            return Ok(self.client.clone());
        };

        if let Some(existing) = self.cert_clients.get(&cert.certificate) {
            return Ok(existing.clone());
        }

        let mut pem = fs::read(&cert.certificate)?;
        pem.extend(fs::read(&cert.certificate_key)?);
        let identity = reqwest::Identity::from_pem(&pem)?;

        let client = Client::builder()
            .timeout(self.timeout)
            .identity(identity)
            .build()?;
        self.cert_clients.insert(cert.certificate.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        let client = self.client_for(&request.options)?;

        if request
            .options
            .client_cert
            .as_ref()
            .is_some_and(|cert| cert.verbose)
        {
            debug!(method = %request.method, url = %request.url, "Certificate-routed request");
        }

        let mut builder = client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        match &request.body {
            Some(RequestBody::Json(value)) => builder = builder.json(value),
            Some(RequestBody::Form(pairs)) => builder = builder.form(pairs),
            None => {}
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
