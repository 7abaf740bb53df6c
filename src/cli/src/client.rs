//! HTTP client for communicating with the license API server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// License status as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub id: String,
    pub is_valid_seat: bool,
    pub seat_type: Option<String>,
    pub expiration_date: Option<String>,
}

/// Partial update sent to the API. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_valid_seat: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl LicenseUpdate {
    pub fn is_empty(&self) -> bool {
        self.is_valid_seat.is_none() && self.seat_type.is_none() && self.expiration_date.is_none()
    }
}

/// HTTP client for the license API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the authorization of a user.
    pub async fn get_authorization(&self, user_id: &str) -> Result<LicenseStatus> {
        self.get(&authorization_path(user_id)).await
    }

    /// Apply a partial update to a user's authorization.
    pub async fn update_authorization(
        &self,
        user_id: &str,
        update: &LicenseUpdate,
    ) -> Result<LicenseStatus> {
        self.put(&authorization_path(user_id), update).await
    }

    /// Perform a GET request and deserialize the response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        parse(resp, &url).await
    }

    /// Perform a PUT request with a JSON body and deserialize the response.
    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .put(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", url))?;

        parse(resp, &url).await
    }

    /// Perform a raw GET request and return the full JSON value (for health endpoint).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        self.get(path).await
    }
}

fn authorization_path(user_id: &str) -> String {
    format!("/users/{}/authorizations", urlencoding::encode(user_id))
}

async fn parse<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => anyhow::bail!("API error ({}): {} [{}]", status, err.error.message, err.error.code),
            Err(_) => anyhow::bail!("API error ({}): {}", status, body),
        }
    }

    resp.json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_authorization_path_encodes_user_id() {
        assert_eq!(authorization_path("42"), "/users/42/authorizations");
        assert_eq!(
            authorization_path("a b/c"),
            "/users/a%20b%2Fc/authorizations"
        );
        assert_eq!(authorization_path("ü"), "/users/%C3%BC/authorizations");
    }

    #[tokio::test]
    async fn test_get_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/1/authorizations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1",
                "isValidSeat": true,
                "seatType": "Premium",
                "expirationDate": "2024-12-31"
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let status = client.get_authorization("1").await.unwrap();

        assert!(status.is_valid_seat);
        assert_eq!(status.seat_type.as_deref(), Some("Premium"));
    }

    #[tokio::test]
    async fn test_update_sends_only_set_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/users/7/authorizations"))
            .and(body_json(json!({"seatType": "Trial"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "7",
                "isValidSeat": false,
                "seatType": "Trial",
                "expirationDate": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&format!("{}/", server.uri())).unwrap();
        let update = LicenseUpdate {
            seat_type: Some("Trial".into()),
            ..Default::default()
        };
        let status = client.update_authorization("7", &update).await.unwrap();

        assert_eq!(status.expiration_date, None);
    }

    #[tokio::test]
    async fn test_error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/users/1/authorizations"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "success": false,
                "error": {
                    "code": "EMPTY_UPDATE",
                    "numeric_code": 4101,
                    "message": "No updates provided",
                    "timestamp": "2024-05-01T12:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client
            .update_authorization("1", &LicenseUpdate::default())
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("422"));
        assert!(err.contains("No updates provided"));
        assert!(err.contains("EMPTY_UPDATE"));
    }
}
