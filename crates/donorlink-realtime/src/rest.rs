//! HTTP implementations of the REST collaborators.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use donorlink_core::{
    CacheKey, Error, GamificationState, InboxApi, Notification, ProgressApi, ResourceFetcher,
    Result,
};

/// Request timeout for REST calls.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Inbox listing as returned by the server: either a bare array or wrapped.
///
/// Records are kept as raw JSON so one bad entry does not reject the list.
#[derive(Deserialize)]
#[serde(untagged)]
enum InboxBody {
    List(Vec<JsonValue>),
    Wrapped { notifications: Vec<JsonValue> },
}

impl InboxBody {
    fn into_list(self) -> Vec<Notification> {
        let records = match self {
            InboxBody::List(list) => list,
            InboxBody::Wrapped { notifications } => notifications,
        };
        let total = records.len();
        let list: Vec<Notification> = records
            .iter()
            .filter_map(|record| {
                let notification = Notification::from_record(record);
                if notification.is_none() {
                    warn!(record = %record, "Skipping inbox record without an id");
                }
                notification
            })
            .collect();
        if list.len() < total {
            warn!(total, kept = list.len(), "Inbox listing had unusable records");
        }
        list
    }
}

/// REST client for the platform API, authenticated with the session token.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL for a cache key: `{base}/{segment}` or `{base}/{segment}/{id}`.
    pub fn resource_url(&self, key: &CacheKey) -> String {
        match &key.id {
            Some(id) => format!("{}/{}/{}", self.base_url, key.resource.path_segment(), id),
            None => format!("{}/{}", self.base_url, key.resource.path_segment()),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .header("Authorization", format!("Bearer {}", self.token))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.authorized(self.client.request(method, url))
    }

    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(format!("{what}: {e}")))?;
        check_status(what, response).await
    }
}

async fn check_status(what: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(what, status, &body))
}

fn status_error(what: &str, status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(format!("{what}: {status}"))
        }
        _ => Error::Request(format!("{what} returned {status}: {body}")),
    }
}

#[async_trait]
impl ResourceFetcher for HttpApi {
    async fn fetch(&self, key: &CacheKey) -> Result<JsonValue> {
        let what = key.to_string();
        let url = self.resource_url(key);
        debug!(%key, url = %url, "Fetching resource");
        let request = self.authorized(self.client.get(url));
        let response = self.send(&what, request).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("{what}: {e}")))
    }
}

#[async_trait]
impl InboxApi for HttpApi {
    async fn fetch_inbox(&self) -> Result<Vec<Notification>> {
        let response = self
            .send("notifications", self.request(Method::GET, "/notifications"))
            .await?;
        let body: InboxBody = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("notifications: {e}")))?;
        Ok(body.into_list())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let path = format!("/notifications/{id}/read");
        self.send(&path, self.request(Method::PATCH, &path)).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        let path = "/notifications/read-all";
        self.send(path, self.request(Method::PATCH, path)).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressApi for HttpApi {
    async fn fetch_progress(&self) -> Result<GamificationState> {
        let response = self
            .send("gamification", self.request(Method::GET, "/gamification/me"))
            .await?;
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("gamification: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use donorlink_core::ResourceType;
    use serde_json::json;

    #[test]
    fn test_resource_urls() {
        let api = HttpApi::new("https://api.example.org/v1/", "t");
        assert_eq!(api.base_url(), "https://api.example.org/v1");
        assert_eq!(
            api.resource_url(&CacheKey::collection(ResourceType::HelpRequests)),
            "https://api.example.org/v1/help-requests"
        );
        assert_eq!(
            api.resource_url(&CacheKey::item(ResourceType::Events, "42")),
            "https://api.example.org/v1/events/42"
        );
    }

    #[test]
    fn test_inbox_body_shapes() {
        let bare: InboxBody = serde_json::from_value(json!([{"id": "a"}])).unwrap();
        assert_eq!(bare.into_list().len(), 1);

        let wrapped: InboxBody =
            serde_json::from_value(json!({"notifications": [{"id": "a"}, {"id": "b"}]})).unwrap();
        assert_eq!(wrapped.into_list().len(), 2);
    }

    #[test]
    fn test_inbox_body_skips_unusable_records() {
        let body: InboxBody = serde_json::from_value(json!({"notifications": [
            {"id": "a"},
            {"_id": "b", "type": "donation"},
            {"title": "missing id"},
            null
        ]}))
        .unwrap();
        let list = body.into_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, "b");
        assert_eq!(list[1].category, donorlink_core::NotificationCategory::Donation);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("events/9", StatusCode::NOT_FOUND, ""),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error("events", StatusCode::UNAUTHORIZED, ""),
            Error::Unauthorized(_)
        ));
        let err = status_error("events", StatusCode::SERVICE_UNAVAILABLE, "maintenance");
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let api = HttpApi::new("http://127.0.0.1:9", "t");
        let err = api.mark_all_read().await.unwrap_err();
        assert!(matches!(err, Error::Request(_)), "got {err:?}");
    }
}
