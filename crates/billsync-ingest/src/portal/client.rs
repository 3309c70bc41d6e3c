//! HTTP client for the billing portal

use super::extract::{extract_records, extract_total};
use super::{ListingRequest, ListingSource, Page};
use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::retry::RetryAction;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

const API_PREFIX: &str = "/suthra-punjab/backend/public/api";
const LOGIN_PATH: &str = "/login";
const SWITCH_DESIGNATION_PATH: &str = "/hrmis/set-active-designation";
const LISTING_PATH: &str = "/autoform/get-item-listing";
const USER_AGENT: &str = concat!("billsync/", env!("CARGO_PKG_VERSION"));

/// Unauthenticated portal client
pub struct PortalClient {
    http: reqwest::Client,
    base: Url,
    config: PortalConfig,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> Result<Self, PortalError> {
        let base = Url::parse(&config.base_host)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        if let Ok(origin) = HeaderValue::from_str(config.base_host.trim_end_matches('/')) {
            headers.insert(ORIGIN, origin);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self { http, base, config })
    }

    fn api_url(&self, path: &str) -> Result<Url, PortalError> {
        Ok(self.base.join(&format!("{}{}", API_PREFIX, path))?)
    }

    /// Exchange credentials for a bearer token
    ///
    /// Any failure here is fatal for the run: without a token nothing
    /// downstream can be fetched.
    pub async fn login(self) -> Result<PortalSession, PortalError> {
        if !self.config.has_credentials() {
            return Err(PortalError::Auth("PORTAL_CNIC and PORTAL_PASSWORD must be set".into()));
        }

        let url = self.api_url(LOGIN_PATH)?;
        let body = json!({
            "cnic": self.config.cnic,
            "password": self.config.password,
            "user_type": self.config.user_type,
        });

        let policy = self.config.fetch_retry_policy();
        let http = &self.http;
        let (url, body) = (&url, &body);
        let response: Value = policy
            .run(
                "portal login",
                |e: &PortalError| {
                    if e.is_transient() {
                        RetryAction::Retry
                    } else {
                        RetryAction::Abort
                    }
                },
                move |_| async move {
                    let resp = http.post(url.clone()).json(body).send().await?;
                    let status = resp.status();
                    if status.is_server_error() || status.as_u16() == 429 {
                        return Err(PortalError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    if !status.is_success() {
                        return Err(PortalError::Auth(format!("login returned {}", status)));
                    }
                    Ok(resp.json::<Value>().await?)
                },
            )
            .await
            .map_err(|e| match e {
                PortalError::Auth(_) => e,
                other => PortalError::Auth(other.to_string()),
            })?;

        let token = response
            .pointer("/data/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PortalError::Auth("no token in login response".into()))?
            .to_string();

        info!(host = %self.base, "Authenticated with portal");
        Ok(PortalSession {
            http: self.http,
            base: self.base,
            token,
        })
    }
}

/// Authenticated portal session; the token travels with the session value
pub struct PortalSession {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl PortalSession {
    fn api_url(&self, path: &str) -> Result<Url, PortalError> {
        Ok(self.base.join(&format!("{}{}", API_PREFIX, path))?)
    }

    async fn post_json(&self, url: Url, referer: Option<Url>, body: &Value) -> Result<String, PortalError> {
        let mut request = self.http.post(url.clone()).bearer_auth(&self.token).json(body);
        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer.as_str());
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PortalError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ListingSource for PortalSession {
    async fn fetch_listing(&self, request: &ListingRequest<'_>) -> Result<Page, PortalError> {
        let profile = request.profile;

        let mut filters = serde_json::Map::new();
        for key in profile.filter_keys {
            filters.insert((*key).to_string(), Value::String(String::new()));
        }
        for (key, value) in request.filters {
            filters.insert(key.clone(), Value::String(value.clone()));
        }

        let columns: Vec<Value> = profile
            .display_columns
            .iter()
            .map(|(key, label, visible)| json!({"key": key, "column": visible, "value": label}))
            .collect();

        let body = json!({
            "slug": profile.slug,
            "id": "0",
            "page": request.page,
            "size": request.size,
            "search_keyword": "",
            "sorting": "",
            "requesting_url": profile.requesting_url,
            "displayedColumnsAll": columns,
            "filters_data": filters,
            "user_type": "contractor",
            "plateform": "web",
        });

        let url = self.api_url(LISTING_PATH)?;
        let referer = self.base.join(profile.requesting_url).ok();
        let text = self.post_json(url, referer, &body).await?;

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    slug = profile.slug,
                    page = request.page,
                    error = %e,
                    "Listing response is not JSON, treating page as empty"
                );
                return Ok(Page::default());
            },
        };

        let page = Page {
            records: extract_records(&parsed),
            total: extract_total(&parsed),
        };
        debug!(
            slug = profile.slug,
            page = request.page,
            records = page.records.len(),
            "Fetched listing page"
        );
        Ok(page)
    }

    async fn switch_designation(&self, designation_id: i64) -> Result<(), PortalError> {
        let url = self.api_url(SWITCH_DESIGNATION_PATH)?;
        self.post_json(url, None, &json!({ "designation_id": designation_id }))
            .await
            .map_err(|e| PortalError::Designation {
                designation_id,
                reason: e.to_string(),
            })?;
        info!(designation_id, "Switched active designation");
        Ok(())
    }
}
