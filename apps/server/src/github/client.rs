use async_trait::async_trait;
use reqwest::header::LINK;
use reqwest::{RequestBuilder, StatusCode};
use url::Url;

use super::{DeliveryPage, EventSource, GithubError};
use crate::auth::AppTokenSource;
use crate::config::GithubConfig;
use crate::models::DeliveryEvent;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("hookline/", env!("CARGO_PKG_VERSION"));

/// GitHub App client for the webhook delivery endpoints
pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    tokens: AppTokenSource,
    page_size: u32,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, config: &GithubConfig) -> Result<Self, GithubError> {
        let api_base = Url::parse(&api_base_url(&config.domain, config.api_url.as_deref()))?;
        let tokens = AppTokenSource::new(config.app_id.clone(), &config.private_key)?;

        Ok(Self {
            http,
            api_base,
            tokens,
            page_size: config.page_size,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GithubError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Adds App authentication, refreshing the JWT if it has aged out
    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, GithubError> {
        Ok(request
            .bearer_auth(self.tokens.token()?)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT))
    }
}

#[async_trait]
impl EventSource for GithubClient {
    async fn list_deliveries(&self, cursor: Option<&str>) -> Result<DeliveryPage, GithubError> {
        let mut url = self.endpoint(&["app", "hook", "deliveries"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("per_page", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }

        let response = self.authorized(self.http.get(url))?.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GithubError::Status {
                operation: "list deliveries",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let next_cursor = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_cursor);
        let deliveries: Vec<DeliveryEvent> = response.json().await?;

        Ok(DeliveryPage {
            deliveries,
            next_cursor,
        })
    }

    async fn redeliver_event(&self, delivery_id: i64) -> Result<(), GithubError> {
        let id = delivery_id.to_string();
        let url = self.endpoint(&["app", "hook", "deliveries", &id, "attempts"])?;

        let response = self.authorized(self.http.post(url))?.send().await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(GithubError::Status {
                operation: "redeliver",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// REST API root for a GitHub domain
pub fn api_base_url(domain: &str, api_url: Option<&str>) -> String {
    match api_url {
        Some(url) => url.to_string(),
        None if domain == "github.com" => "https://api.github.com".to_string(),
        None => format!("https://{}/api/v3", domain),
    }
}

/// Extracts the `cursor` query parameter from the `rel="next"` entry of a Link header
pub fn parse_next_cursor(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }

        let url = Url::parse(target.strip_prefix('<')?.strip_suffix('>')?).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "cursor")
            .map(|(_, value)| value.into_owned())
    })
}
