//! PostgREST client implementation of [`CatalogApi`].
//!
//! Wire conventions reproduced here:
//! - delta filters use `column=operator.value` (`updated_at=gt.<ISO8601>`)
//! - timestamps are normalized to `Z`-suffixed UTC before URL placement
//! - every call carries the `apikey` header; a bearer token is attached
//!   whenever a session exists
//! - GETs go through the bounded-backoff retry wrapper; writes do not

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::{ApiError, ApiResult, CatalogApi};
use crate::auth::{SessionStore, TokenManager};
use crate::config::{RemoteConfig, HTTP_TIMEOUT_SECS};
use crate::models::{
    AttractionId, NewReview, Reaction, RemoteAttraction, RemoteReview, ReviewId, Tombstone,
    ENTITY_TYPE_ATTRACTION,
};
use crate::net::{with_retry, RetryPolicy};
use crate::util::{compact_text, normalize_utc_timestamp, to_utc_rfc3339};

/// Render a timestamp for use inside a PostgREST filter value
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    urlencoding::encode(&normalize_utc_timestamp(&to_utc_rfc3339(ts))).into_owned()
}

/// `column=gt.<ts>` filter fragment
fn gt_filter(column: &str, ts: &DateTime<Utc>) -> String {
    format!("{column}=gt.{}", encode_timestamp(ts))
}

/// One outbound call, buildable repeatedly so the reactive-refresh path can
/// re-send it with a fresh token.
struct PreparedRequest {
    method: Method,
    url: String,
    body: Option<serde_json::Value>,
    prefer: Option<&'static str>,
    /// Idempotent requests are eligible for transport retry
    idempotent: bool,
}

impl PreparedRequest {
    fn get(url: String) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            prefer: None,
            idempotent: true,
        }
    }

    fn post(url: String, body: serde_json::Value, prefer: Option<&'static str>) -> Self {
        Self {
            method: Method::POST,
            url,
            body: Some(body),
            prefer,
            idempotent: false,
        }
    }

    fn delete(url: String) -> Self {
        Self {
            method: Method::DELETE,
            url,
            body: None,
            prefer: None,
            // Deleting by key is safe to repeat
            idempotent: true,
        }
    }
}

/// REST client for the data API
pub struct PostgrestClient<S: SessionStore> {
    data_url: String,
    api_key: String,
    client: Client,
    tokens: Arc<TokenManager<S>>,
    retry: RetryPolicy,
}

impl<S: SessionStore> PostgrestClient<S> {
    pub fn new(config: &RemoteConfig, tokens: Arc<TokenManager<S>>) -> ApiResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            data_url: config.data_url(),
            api_key: config.api_key().to_string(),
            client,
            tokens,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry schedule
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build(&self, request: &PreparedRequest, bearer: Option<&str>) -> RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header("apikey", &self.api_key)
            .header("Accept", "application/json");

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(prefer) = request.prefer {
            builder = builder.header("Prefer", prefer);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }

    /// One send attempt: transport errors and 5xx surface as `Err` so the
    /// retry wrapper can act on them; everything else returns the response.
    async fn attempt(
        &self,
        request: &PreparedRequest,
        bearer: Option<&str>,
    ) -> ApiResult<Response> {
        let response = self.build(request, bearer).send().await?;
        let status = response.status();

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: compact_text(&body),
            });
        }

        Ok(response)
    }

    async fn send_once(
        &self,
        request: &PreparedRequest,
        bearer: Option<&str>,
    ) -> ApiResult<Response> {
        if request.idempotent {
            with_retry(&self.retry, || self.attempt(request, bearer)).await
        } else {
            self.attempt(request, bearer).await
        }
    }

    fn is_auth_rejection(status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
    }

    /// Dispatch with the proactive and reactive token paths applied.
    ///
    /// When an authenticated call comes back 401/403 the session is
    /// refreshed (single-flight) and the call re-sent exactly once; a second
    /// rejection surfaces as session-expired. Unauthenticated calls skip
    /// both paths.
    async fn dispatch(&self, request: &PreparedRequest) -> ApiResult<Response> {
        let token = self.tokens.token_for_request().await?;
        let response = self.send_once(request, token.as_deref()).await?;

        if let Some(stale) = token {
            if Self::is_auth_rejection(response.status()) {
                tracing::debug!("Authenticated call rejected; refreshing and retrying once");
                let fresh = self.tokens.refresh_after_rejection(&stale).await?;
                let retried = self.send_once(request, Some(&fresh)).await?;

                if Self::is_auth_rejection(retried.status()) {
                    return Err(ApiError::SessionExpired);
                }
                return Self::check_status(retried).await;
            }
        }

        Self::check_status(response).await
    }

    async fn check_status(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: compact_text(&body),
        })
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: String) -> ApiResult<Vec<T>> {
        let response = self.dispatch(&PreparedRequest::get(url)).await?;
        Ok(response.json::<Vec<T>>().await?)
    }
}

#[async_trait]
impl<S: SessionStore> CatalogApi for PostgrestClient<S> {
    async fn fetch_attractions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<RemoteAttraction>> {
        let mut url = format!(
            "{}/attractions?select=*&is_published=eq.true",
            self.data_url
        );
        if let Some(since) = since {
            url.push('&');
            url.push_str(&gt_filter("updated_at", &since));
        }
        self.fetch_rows(url).await
    }

    async fn fetch_tombstones(&self, since: DateTime<Utc>) -> ApiResult<Vec<Tombstone>> {
        let url = format!(
            "{}/deleted_records?select=*&entity_type=eq.{ENTITY_TYPE_ATTRACTION}&{}",
            self.data_url,
            gt_filter("deleted_at", &since)
        );
        self.fetch_rows(url).await
    }

    async fn fetch_reviews(&self, since: Option<DateTime<Utc>>) -> ApiResult<Vec<RemoteReview>> {
        let mut url = format!("{}/reviews?select=*", self.data_url);
        if let Some(since) = since {
            url.push('&');
            url.push_str(&gt_filter("updated_at", &since));
        }
        self.fetch_rows(url).await
    }

    async fn fetch_reviews_for(
        &self,
        attraction_id: &AttractionId,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<RemoteReview>> {
        let mut url = format!(
            "{}/reviews?select=*&attraction_id=eq.{attraction_id}",
            self.data_url
        );
        if let Some(since) = since {
            url.push('&');
            url.push_str(&gt_filter("updated_at", &since));
        }
        self.fetch_rows(url).await
    }

    async fn submit_review(&self, review: &NewReview) -> ApiResult<RemoteReview> {
        if !self.tokens.is_signed_in() {
            return Err(ApiError::NotSignedIn);
        }

        let request = PreparedRequest::post(
            format!("{}/reviews", self.data_url),
            serde_json::to_value(review)
                .map_err(|e| ApiError::InvalidResponse(e.to_string()))?,
            Some("return=representation"),
        );

        let response = self.dispatch(&request).await?;
        let mut rows = response.json::<Vec<RemoteReview>>().await?;
        rows.pop()
            .ok_or_else(|| ApiError::InvalidResponse("insert returned no rows".to_string()))
    }

    async fn set_reaction(
        &self,
        review_id: &ReviewId,
        reaction: Option<Reaction>,
    ) -> ApiResult<()> {
        if !self.tokens.is_signed_in() {
            return Err(ApiError::NotSignedIn);
        }

        let request = match reaction {
            Some(reaction) => PreparedRequest::post(
                format!("{}/review_reactions", self.data_url),
                serde_json::json!({
                    "review_id": review_id,
                    "reaction": reaction,
                }),
                Some("resolution=merge-duplicates"),
            ),
            None => PreparedRequest::delete(format!(
                "{}/review_reactions?review_id=eq.{review_id}",
                self.data_url
            )),
        };

        self.dispatch(&request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn gt_filter_normalizes_and_encodes_timestamps() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let filter = gt_filter("updated_at", &ts);

        assert!(filter.starts_with("updated_at=gt."));
        // The encoded value must end in Z, never an explicit offset
        assert!(filter.ends_with('Z'));
        assert!(!filter.contains("%2B00%3A00"));
        assert!(!filter.contains("+00:00"));
    }

    #[test]
    fn encode_timestamp_escapes_colons() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 15).unwrap();
        let encoded = encode_timestamp(&ts);
        assert!(!encoded.contains(':'));
        assert!(encoded.contains("%3A"));
    }

    #[test]
    fn prepared_request_idempotency() {
        assert!(PreparedRequest::get("https://x".to_string()).idempotent);
        assert!(PreparedRequest::delete("https://x".to_string()).idempotent);
        assert!(
            !PreparedRequest::post("https://x".to_string(), serde_json::json!({}), None)
                .idempotent
        );
    }
}
