use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use engine_logging::engine_debug;
use likers_core::{Cursor, LikerProfile, RateWindow};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use url::Url;

use crate::{ApiError, ApiErrorKind, LikesPage, PageRequest, TransientCause};

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com/2/";
pub const RATE_REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RATE_RESET_HEADER: &str = "x-rate-limit-reset";

const DEFAULT_USER_FIELDS: &str = "id,name,username,verified,created_at,description,public_metrics";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub user_fields: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("likers-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            user_fields: DEFAULT_USER_FIELDS.to_string(),
        }
    }
}

/// Attaches credentials to an outgoing request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}

/// App-only bearer token authentication.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl RequestSigner for BearerToken {
    fn sign(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.0)
    }
}

/// One page of the accounts that liked a post.
#[async_trait::async_trait]
pub trait LikesApi: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LikesPage, ApiError>;
}

pub struct ReqwestLikesApi {
    client: reqwest::Client,
    base_url: Url,
    user_fields: String,
    signer: Arc<dyn RequestSigner>,
}

impl ReqwestLikesApi {
    pub fn new(settings: ApiSettings, signer: Arc<dyn RequestSigner>) -> Result<Self, ApiError> {
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|err| {
            ApiError::new(
                ApiErrorKind::Rejected { status: 0 },
                format!("invalid api base url {base:?}: {err}"),
            )
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| {
                ApiError::new(ApiErrorKind::Transient(TransientCause::Network), err.to_string())
            })?;

        Ok(Self {
            client,
            base_url,
            user_fields: settings.user_fields,
            signer,
        })
    }

    fn endpoint(&self, request: &PageRequest) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::new(ApiErrorKind::Rejected { status: 0 }, "api base url cannot be a base")
            })?
            .pop_if_empty()
            .extend(["tweets", request.post_id.as_str(), "liking_users"]);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("max_results", &request.page_size.get().to_string());
            query.append_pair("user.fields", &self.user_fields);
            if let Some(cursor) = &request.cursor {
                query.append_pair("pagination_token", cursor.as_str());
            }
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl LikesApi for ReqwestLikesApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LikesPage, ApiError> {
        let url = self.endpoint(request)?;
        engine_debug!(
            "GET liking users post={} cursor={:?} max_results={}",
            request.post_id,
            request.cursor.as_ref().map(Cursor::as_str),
            request.page_size.get()
        );

        let response = self
            .signer
            .sign(self.client.get(url))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let rate = parse_rate_window(response.headers());
        let reset_at = parse_reset(response.headers());

        if response.status().is_success() {
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            return parse_page(&body, rate);
        }

        let body = response.text().await.unwrap_or_default();
        let message = truncate(&body, MAX_ERROR_BODY);
        let kind = match status {
            429 => ApiErrorKind::RateLimited { reset_at },
            401 | 403 => ApiErrorKind::Auth { status },
            404 => ApiErrorKind::NotFound,
            500..=599 => ApiErrorKind::Transient(TransientCause::HttpStatus(status)),
            _ => ApiErrorKind::Rejected { status },
        };
        Err(ApiError::new(kind, message))
    }
}

#[derive(Debug, Deserialize)]
struct LikingUsersBody {
    #[serde(default)]
    data: Vec<ApiUser>,
    #[serde(default)]
    meta: Option<ApiMeta>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    username: String,
    name: Option<String>,
    #[serde(default)]
    verified: bool,
    created_at: Option<String>,
    description: Option<String>,
    public_metrics: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiMeta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    #[serde(rename = "type")]
    problem_type: Option<String>,
    title: Option<String>,
    detail: Option<String>,
}

impl From<ApiUser> for LikerProfile {
    fn from(user: ApiUser) -> Self {
        LikerProfile {
            user_id: user.id,
            username: user.username,
            name: user.name,
            verified: user.verified,
            created_at: user.created_at,
            description: user.description,
            public_metrics: user.public_metrics.map(|metrics| metrics.to_string()),
        }
    }
}

pub(crate) fn parse_page(body: &[u8], rate: Option<RateWindow>) -> Result<LikesPage, ApiError> {
    let parsed: LikingUsersBody = serde_json::from_slice(body)
        .map_err(|err| ApiError::new(ApiErrorKind::Malformed, err.to_string()))?;

    // Missing or hidden posts come back as 200 with only an `errors` array.
    if parsed.data.is_empty() {
        if let Some(problem) = parsed.errors.first() {
            return Err(problem_to_error(problem));
        }
    }

    let next_cursor = parsed
        .meta
        .and_then(|meta| meta.next_token)
        .filter(|token| !token.is_empty())
        .map(Cursor::new);

    Ok(LikesPage {
        users: parsed.data.into_iter().map(LikerProfile::from).collect(),
        next_cursor,
        rate,
    })
}

fn problem_to_error(problem: &ApiProblem) -> ApiError {
    let problem_type = problem.problem_type.as_deref().unwrap_or_default();
    let kind = if problem_type.ends_with("resource-not-found") {
        ApiErrorKind::NotFound
    } else if problem_type.ends_with("not-authorized-for-resource") {
        ApiErrorKind::Auth { status: 200 }
    } else {
        ApiErrorKind::Rejected { status: 200 }
    };
    let message = problem
        .detail
        .clone()
        .or_else(|| problem.title.clone())
        .unwrap_or_else(|| problem_type.to_string());
    ApiError::new(kind, message)
}

pub(crate) fn parse_rate_window(headers: &HeaderMap) -> Option<RateWindow> {
    let remaining_calls = header_i64(headers, RATE_REMAINING_HEADER)?;
    let reset_at = parse_reset(headers)?;
    Some(RateWindow {
        remaining_calls,
        reset_at,
    })
}

fn parse_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let epoch = header_i64(headers, RATE_RESET_HEADER)?;
    if epoch <= 0 {
        return None;
    }
    DateTime::from_timestamp(epoch, 0)
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(ApiErrorKind::Transient(TransientCause::Timeout), err.to_string());
    }
    if err.is_decode() {
        return ApiError::new(ApiErrorKind::Malformed, err.to_string());
    }
    ApiError::new(ApiErrorKind::Transient(TransientCause::Network), err.to_string())
}
