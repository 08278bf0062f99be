//! Apex gateway orchestrator
//!
//! The public-facing client: resolves the active connection, obtains a
//! bearer token through the cache, builds and executes the request, and
//! retries exactly once after invalidating the token on a 401.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

use crate::config::Config;
use crate::error::{ApiFailure, RequestContext};
use crate::registry::ConnectionRegistry;
use crate::request::RequestBuilder;
use crate::token::{TokenCache, TokenIssuer};
use crate::transport::{
    HttpTransport, Method, RequestBody, Transport, TransportOptions, TransportRequest,
    TransportResponse,
};
use crate::{Error, Result};

/// Per-instance selection state
#[derive(Default)]
struct Selection {
    explicit: Option<String>,
    environment_override: Option<String>,
    email: Option<String>,
    context: Option<RequestContext>,
}

/// Authenticated client for Salesforce Apex REST endpoints.
///
/// Instances own their selection state; the only cross-instance sharing
/// is through the injected [`TokenCache`] and [`ConnectionRegistry`].
pub struct ApexGateway {
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    cache: Arc<TokenCache>,
    transport: Arc<dyn Transport>,
    issuer: TokenIssuer,
    selection: RwLock<Selection>,
}

impl ApexGateway {
    /// Create a gateway over an injected transport and token cache.
    ///
    /// The default connection is validated immediately; an invalid or
    /// missing default is a startup error.
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&config)));
        Self::with_registry(config, registry, transport, cache)
    }

    /// Create a gateway sharing an existing registry
    pub fn with_registry(
        config: Arc<Config>,
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn Transport>,
        cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let default_name = registry.default_name().to_string();
        registry.resolve(&default_name)?;

        Ok(Self {
            config,
            issuer: TokenIssuer::new(Arc::clone(&transport)),
            registry,
            cache,
            transport,
            selection: RwLock::new(Selection::default()),
        })
    }

    /// Convenience constructor building an [`HttpTransport`] from the
    /// configured timeout and a fresh token cache.
    pub fn from_config(config: Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.http.timeout)?);
        Self::new(Arc::new(config), transport, Arc::new(TokenCache::new()))
    }

    /// Set the acting user's email, overriding the connection default
    pub fn set_email(&self, email: impl Into<String>) -> &Self {
        self.selection.write().email = Some(email.into());
        self
    }

    /// Attach request metadata included in failure context and logs
    pub fn with_context(&self, context: RequestContext) -> &Self {
        self.selection.write().context = Some(context);
        self
    }

    /// Switch the explicit connection selection.
    ///
    /// Cached tokens are left untouched: each connection has its own
    /// cache entry, and a still-valid token is reused when switching
    /// back.
    pub fn connection(&self, name: impl Into<String>) -> &Self {
        self.selection.write().explicit = Some(name.into());
        self
    }

    /// Select `name` while the running environment is one of
    /// `environments`. A non-matching environment never clears an
    /// override that an earlier call set.
    ///
    /// Setting the override invalidates the previously active
    /// connection's cached token.
    pub fn when_environment(&self, name: impl Into<String>, environments: &[&str]) -> &Self {
        if environments.contains(&self.config.environment.as_str()) {
            let previous = self.active_connection();
            self.cache.invalidate(&previous);
            self.selection.write().environment_override = Some(name.into());
        }
        self
    }

    /// Currently active connection name
    #[must_use]
    pub fn get_connection(&self) -> String {
        self.active_connection()
    }

    /// Send a GET request to an Apex endpoint
    pub async fn get(
        &self,
        url: &str,
        query: &HashMap<String, String>,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse> {
        self.send_request(Method::Get, url, query, None, headers)
            .await
    }

    /// Send a POST request with a JSON payload
    pub async fn post(
        &self,
        url: &str,
        data: &Value,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse> {
        self.send_request(Method::Post, url, &HashMap::new(), Some(data), headers)
            .await
    }

    /// Send a PUT request with a JSON payload
    pub async fn put(
        &self,
        url: &str,
        data: &Value,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse> {
        self.send_request(Method::Put, url, &HashMap::new(), Some(data), headers)
            .await
    }

    /// Send a PATCH request with a JSON payload
    pub async fn patch(
        &self,
        url: &str,
        data: &Value,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse> {
        self.send_request(Method::Patch, url, &HashMap::new(), Some(data), headers)
            .await
    }

    /// Send a DELETE request
    pub async fn delete(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse> {
        self.send_request(Method::Delete, url, &HashMap::new(), None, headers)
            .await
    }

    fn active_connection(&self) -> String {
        let selection = self.selection.read();
        self.registry
            .active_name(
                selection.explicit.as_deref(),
                selection.environment_override.as_deref(),
            )
            .to_string()
    }

    /// Resolve the active connection, clearing an override that names an
    /// unconfigured connection so resolution retries against the
    /// explicit-then-default selection.
    fn resolve_active(&self) -> Result<String> {
        {
            let mut selection = self.selection.write();
            if let Some(name) = selection.environment_override.as_deref() {
                if !self.registry.contains(name) {
                    selection.environment_override = None;
                }
            }
        }

        let name = self.active_connection();
        self.registry.resolve(&name)?;
        Ok(name)
    }

    async fn send_request(
        &self,
        method: Method,
        path: &str,
        query: &HashMap<String, String>,
        data: Option<&Value>,
        additional_headers: &HashMap<String, String>,
    ) -> Result<TransportResponse> {
        let connection_name = self.resolve_active()?;
        let connection = self.registry.resolve(&connection_name)?;

        let builder = RequestBuilder::new(connection, &self.config);
        let options = builder.transport_options()?;
        let full_url = builder.full_url(path, query)?;

        let (email, context) = {
            let selection = self.selection.read();
            (selection.email.clone(), selection.context.clone())
        };
        let base_headers = builder.headers(email.as_deref(), additional_headers);

        let token = self
            .cache
            .get_or_refresh(&connection_name, || self.issuer.issue(connection))
            .await?;

        let mut response = self
            .execute(method, &full_url, &base_headers, &token, data, &options, context.as_ref())
            .await?;

        if response.unauthorized() {
            // Retry exactly once with a freshly issued token
            self.cache.invalidate(&connection_name);
            let token = self
                .cache
                .get_or_refresh(&connection_name, || self.issuer.issue(connection))
                .await?;

            response = self
                .execute(method, &full_url, &base_headers, &token, data, &options, context.as_ref())
                .await?;
        }

        if response.failed() {
            let body = response
                .json()
                .unwrap_or_else(|| Value::String(response.body.clone()));
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Salesforce API error")
                .to_string();

            error!(
                method = %method,
                url = %full_url,
                status = response.status,
                response = %body,
                context = ?context,
                "Salesforce API error"
            );

            return Err(Error::Api(Box::new(ApiFailure {
                status: response.status,
                message,
                method,
                url: full_url,
                payload: data.cloned(),
                response: body,
                context,
            })));
        }

        Ok(response)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        base_headers: &[(String, String)],
        token: &str,
        data: Option<&Value>,
        options: &TransportOptions,
        context: Option<&RequestContext>,
    ) -> Result<TransportResponse> {
        let mut headers = base_headers.to_vec();
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));

        let request = TransportRequest {
            method,
            url: url.to_string(),
            headers,
            body: data.map(|value| RequestBody::Json(value.clone())),
            options: options.clone(),
        };

        match self.transport.request(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // Transport failures are logged separately from API errors
                // and surfaced unmodified
                error!(
                    method = %method,
                    url = %url,
                    error = %e,
                    context = ?context,
                    "Salesforce API request failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::transport::testing::MockTransport;

    const TOKEN_BODY: &str = r#"{"access_token":"tok-1"}"#;

    fn connection(token_uri: &str, apex_uri: &str) -> ConnectionConfig {
        ConnectionConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "user@example.com".to_string(),
            password: "pw".to_string(),
            security_token: "tok".to_string(),
            token_uri: token_uri.to_string(),
            apex_uri: apex_uri.to_string(),
            ..ConnectionConfig::default()
        }
    }

    fn test_config() -> Config {
        let mut config = Config {
            environment: "staging".to_string(),
            ..Config::default()
        };
        config.connections.insert(
            "default".to_string(),
            connection(
                "https://login.x.com/services/oauth2/token",
                "https://x.com/services/apexrest",
            ),
        );
        config.connections.insert(
            "sandbox".to_string(),
            connection(
                "https://sandbox.x.com/services/oauth2/token",
                "https://sandbox.x.com/services/apexrest",
            ),
        );
        config
    }

    fn gateway_with(config: Config) -> (ApexGateway, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let gateway = ApexGateway::new(
            Arc::new(config),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(TokenCache::new()),
        )
        .unwrap();
        (gateway, transport)
    }

    fn bearer_of(request: &TransportRequest) -> Option<&str> {
        request
            .headers
            .iter()
            .find(|(name, _)| name == "Authorization")
            .map(|(_, value)| value.as_str())
    }

    #[tokio::test]
    async fn get_issues_token_then_calls_api() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, r#"{"data":"success"}"#);

        let mut query = HashMap::new();
        query.insert("a".to_string(), "1".to_string());
        let response = gateway.get("/test", &query, &HashMap::new()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.json().unwrap()["data"], "success");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://login.x.com/services/oauth2/token");
        assert_eq!(requests[1].method, Method::Get);
        assert_eq!(requests[1].url, "https://x.com/services/apexrest/test?a=1");
        assert_eq!(bearer_of(&requests[1]), Some("Bearer tok-1"));
    }

    #[tokio::test]
    async fn second_call_reuses_cached_token() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, "{}");
        transport.push_response(200, "{}");

        gateway.get("/a", &HashMap::new(), &HashMap::new()).await.unwrap();
        gateway.get("/b", &HashMap::new(), &HashMap::new()).await.unwrap();

        // one token request, two API calls
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn unauthorized_response_triggers_exactly_one_retry() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(401, "{}");
        transport.push_response(200, r#"{"access_token":"tok-2"}"#);
        transport.push_response(200, r#"{"data":"ok"}"#);

        let response = gateway
            .post("/test", &serde_json::json!({"k": "v"}), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(bearer_of(&requests[1]), Some("Bearer tok-1"));
        assert_eq!(bearer_of(&requests[3]), Some("Bearer tok-2"));
        // the retry repeats the payload
        assert_eq!(requests[3].body, requests[1].body);
    }

    #[tokio::test]
    async fn second_unauthorized_propagates_without_third_attempt() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(401, "{}");
        transport.push_response(200, r#"{"access_token":"tok-2"}"#);
        transport.push_response(401, r#"{"message":"still no"}"#);

        let err = gateway
            .get("/test", &HashMap::new(), &HashMap::new())
            .await
            .unwrap_err();

        let Error::Api(failure) = err else {
            panic!("expected Error::Api");
        };
        assert_eq!(failure.status, 401);
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn api_error_carries_parsed_message_and_request_context() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(400, r#"{"message":"bad field"}"#);

        gateway.with_context(RequestContext {
            uri: "api/orders".to_string(),
            name: Some("orders.sync".to_string()),
            action: None,
        });
        let payload = serde_json::json!({"field": 1});
        let err = gateway
            .post("/orders", &payload, &HashMap::new())
            .await
            .unwrap_err();

        let Error::Api(failure) = err else {
            panic!("expected Error::Api");
        };
        assert_eq!(failure.status, 400);
        assert_eq!(failure.message, "bad field");
        assert_eq!(failure.method, Method::Post);
        assert_eq!(failure.url, "https://x.com/services/apexrest/orders");
        assert_eq!(failure.payload.as_ref(), Some(&payload));
        assert_eq!(failure.context.as_ref().unwrap().uri, "api/orders");
    }

    #[tokio::test]
    async fn non_json_error_body_uses_generic_message() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(500, "<html>oops</html>");

        let err = gateway
            .get("/test", &HashMap::new(), &HashMap::new())
            .await
            .unwrap_err();

        let Error::Api(failure) = err else {
            panic!("expected Error::Api");
        };
        assert_eq!(failure.message, "Unknown Salesforce API error");
        assert_eq!(failure.response, Value::String("<html>oops</html>".to_string()));
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced_unmodified() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_failure();

        let err = gateway
            .get("/test", &HashMap::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn connections_use_distinct_token_cache_entries() {
        let (gateway, transport) = gateway_with(test_config());

        // default token + call
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, "{}");
        gateway.get("/a", &HashMap::new(), &HashMap::new()).await.unwrap();

        // sandbox needs its own token
        transport.push_response(200, r#"{"access_token":"tok-sand"}"#);
        transport.push_response(200, "{}");
        gateway.connection("sandbox");
        gateway.get("/b", &HashMap::new(), &HashMap::new()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[2].url,
            "https://sandbox.x.com/services/oauth2/token"
        );
        assert_eq!(bearer_of(&requests[3]), Some("Bearer tok-sand"));

        // switching back reuses the still-valid default token: no token request
        transport.push_response(200, "{}");
        gateway.connection("default");
        gateway.get("/c", &HashMap::new(), &HashMap::new()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(bearer_of(&requests[4]), Some("Bearer tok-1"));
    }

    #[tokio::test]
    async fn matching_environment_sets_override() {
        let (gateway, _transport) = gateway_with(test_config());
        gateway.when_environment("sandbox", &["staging"]);
        assert_eq!(gateway.get_connection(), "sandbox");
    }

    #[tokio::test]
    async fn non_matching_environment_leaves_default_active() {
        let (gateway, _transport) = gateway_with(test_config());
        gateway.when_environment("sandbox", &["production"]);
        assert_eq!(gateway.get_connection(), "default");
    }

    #[tokio::test]
    async fn setting_override_invalidates_previous_connection_token() {
        let (gateway, transport) = gateway_with(test_config());
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, "{}");
        gateway.get("/a", &HashMap::new(), &HashMap::new()).await.unwrap();

        gateway.when_environment("sandbox", &["staging"]);

        // back on default, the token must be re-issued
        transport.push_response(200, r#"{"access_token":"tok-3"}"#);
        transport.push_response(200, "{}");
        gateway.connection("default");
        gateway.get("/b", &HashMap::new(), &HashMap::new()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(bearer_of(&requests[3]), Some("Bearer tok-3"));
    }

    #[tokio::test]
    async fn unconfigured_override_falls_back_to_default() {
        let (gateway, transport) = gateway_with(test_config());
        gateway.when_environment("missing", &["staging"]);

        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, r#"{"data":"success"}"#);
        let response = gateway
            .get("/test", &HashMap::new(), &HashMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(gateway.get_connection(), "default");
        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://login.x.com/services/oauth2/token");
    }

    #[tokio::test]
    async fn identity_headers_and_caller_email_are_sent() {
        let mut config = test_config();
        let conn = config.connections.get_mut("default").unwrap();
        conn.app_uuid = Some("uuid-1".to_string());
        conn.app_key = Some("key-1".to_string());

        let (gateway, transport) = gateway_with(config);
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, "{}");

        gateway.set_email("caller@example.com");
        gateway.get("/test", &HashMap::new(), &HashMap::new()).await.unwrap();

        let requests = transport.requests();
        let headers = &requests[1].headers;
        assert!(headers.contains(&("x-app-uuid".to_string(), "uuid-1".to_string())));
        assert!(headers.contains(&("x-app-key".to_string(), "key-1".to_string())));
        assert!(headers.contains(&("x-user-email".to_string(), "caller@example.com".to_string())));
    }

    #[tokio::test]
    async fn certificate_connection_pins_port_and_carries_cert_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("client.crt"), "cert").unwrap();
        std::fs::write(dir.path().join("client.key"), "key").unwrap();

        let mut config = test_config();
        config.certificates_dir = dir.path().to_path_buf();
        let conn = config.connections.get_mut("default").unwrap();
        conn.certificate = Some("client.crt".to_string());
        conn.certificate_key = Some("client.key".to_string());

        let (gateway, transport) = gateway_with(config);
        transport.push_response(200, TOKEN_BODY);
        transport.push_response(200, "{}");
        gateway.get("/test", &HashMap::new(), &HashMap::new()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].url, "https://x.com:8443/services/apexrest/test");
        let cert = requests[1].options.client_cert.as_ref().unwrap();
        assert!(cert.certificate.ends_with("client.crt"));
        assert!(cert.certificate_key.ends_with("client.key"));
        // the token request itself does not ride the certificate
        assert!(requests[0].options.client_cert.is_none());
    }

    #[tokio::test]
    async fn invalid_default_connection_fails_at_construction() {
        let mut config = Config::default();
        config
            .connections
            .insert("default".to_string(), ConnectionConfig::default());

        let result = ApexGateway::new(
            Arc::new(config),
            Arc::new(MockTransport::new()) as Arc<dyn Transport>,
            Arc::new(TokenCache::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
