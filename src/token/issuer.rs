//! OAuth2 resource-owner-password-credentials token issuance

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::transport::{Method, RequestBody, Transport, TransportOptions, TransportRequest};
use crate::{Error, Result};

/// Performs the password-grant token request against a connection's
/// token endpoint and validates the response.
pub struct TokenIssuer {
    transport: Arc<dyn Transport>,
}

impl TokenIssuer {
    /// Create an issuer executing through the given transport
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Request a bearer token for `connection`.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] carrying the HTTP status (500 when no response was
    /// obtained) and the raw response body.
    pub async fn issue(&self, connection: &ConnectionConfig) -> Result<String> {
        let form = vec![
            ("grant_type".to_string(), "password".to_string()),
            ("client_id".to_string(), connection.client_id.clone()),
            ("client_secret".to_string(), connection.client_secret.clone()),
            ("username".to_string(), connection.username.clone()),
            // Salesforce expects the security token appended directly to
            // the password, with no separator.
            (
                "password".to_string(),
                format!("{}{}", connection.password, connection.security_token),
            ),
        ];

        let request = TransportRequest {
            method: Method::Post,
            url: connection.token_uri.clone(),
            headers: Vec::new(),
            body: Some(RequestBody::Form(form)),
            options: TransportOptions::default(),
        };

        let response = match self.transport.request(request).await {
            Ok(response) => response,
            Err(e) => {
                return Err(Error::Auth {
                    status: 500,
                    body: e.to_string(),
                });
            }
        };

        if response.successful() {
            if let Some(token) = response
                .json()
                .as_ref()
                .and_then(|body| body.get("access_token"))
                .and_then(Value::as_str)
            {
                // "0" is rejected alongside the empty string; the upstream
                // contract treats it as an absent token.
                if !token.is_empty() && token != "0" {
                    debug!("Obtained Salesforce access token");
                    return Ok(token.to_string());
                }
            }
        }

        Err(Error::Auth {
            status: response.status,
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            client_id: "the-id".to_string(),
            client_secret: "the-secret".to_string(),
            username: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            security_token: "SECTOK".to_string(),
            token_uri: "https://login.example.com/services/oauth2/token".to_string(),
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn issues_token_with_exact_grant_parameters() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, r#"{"access_token":"tok-123"}"#);

        let issuer = TokenIssuer::new(Arc::clone(&transport) as Arc<dyn Transport>);
        let token = issuer.issue(&connection()).await.unwrap();
        assert_eq!(token, "tok-123");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.url, "https://login.example.com/services/oauth2/token");

        let Some(RequestBody::Form(pairs)) = &request.body else {
            panic!("token request must be form-encoded");
        };
        let find = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find("grant_type"), Some("password"));
        assert_eq!(find("client_id"), Some("the-id"));
        assert_eq!(find("client_secret"), Some("the-secret"));
        assert_eq!(find("username"), Some("user@example.com"));
        // password and security token concatenated without separator
        assert_eq!(find("password"), Some("hunter2SECTOK"));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, r#"{"access_token":""}"#);
        let issuer = TokenIssuer::new(transport as Arc<dyn Transport>);

        let err = issuer.issue(&connection()).await.unwrap_err();
        assert!(matches!(err, Error::Auth { status: 200, .. }));
    }

    #[tokio::test]
    async fn literal_zero_token_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, r#"{"access_token":"0"}"#);
        let issuer = TokenIssuer::new(transport as Arc<dyn Transport>);

        assert!(issuer.issue(&connection()).await.is_err());
    }

    #[tokio::test]
    async fn missing_token_field_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, r#"{"instance_url":"https://x.com"}"#);
        let issuer = TokenIssuer::new(transport as Arc<dyn Transport>);

        assert!(issuer.issue(&connection()).await.is_err());
    }

    #[tokio::test]
    async fn error_status_carries_status_and_body() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(400, r#"{"error":"invalid_grant"}"#);
        let issuer = TokenIssuer::new(transport as Arc<dyn Transport>);

        let err = issuer.issue(&connection()).await.unwrap_err();
        let Error::Auth { status, body } = err else {
            panic!("expected Error::Auth");
        };
        assert_eq!(status, 400);
        assert!(body.contains("invalid_grant"));
    }

    #[tokio::test]
    async fn transport_failure_maps_to_status_500() {
        let transport = Arc::new(MockTransport::new());
        transport.push_failure();
        let issuer = TokenIssuer::new(transport as Arc<dyn Transport>);

        let err = issuer.issue(&connection()).await.unwrap_err();
        assert!(matches!(err, Error::Auth { status: 500, .. }));
    }
}
