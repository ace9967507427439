use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{DetailsSource, SourceFuture, json_body};
use crate::key::normalize_isbn;
use crate::models::BookDetails;
use crate::rate_limit::{self, FetchError, RateLimiters};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/books/v1/volumes";

/// Google Books volume lookup by ISBN. The API key is optional.
pub struct GoogleBooksClient {
    api_key: Option<String>,
    base_url: String,
    limiters: Arc<RateLimiters>,
}

impl GoogleBooksClient {
    pub fn new(api_key: Option<String>, limiters: Arc<RateLimiters>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            limiters,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn volume_url(&self, isbn: &str) -> String {
        let mut url = format!(
            "{}?q=isbn:{}",
            self.base_url,
            urlencoding::encode(&normalize_isbn(isbn))
        );
        if let Some(ref key) = self.api_key {
            url.push_str(&format!("&key={}", urlencoding::encode(key)));
        }
        url
    }
}

impl DetailsSource for GoogleBooksClient {
    fn name(&self) -> &str {
        rate_limit::GOOGLE_BOOKS
    }

    fn fetch_details<'a>(
        &'a self,
        isbn: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, BookDetails> {
        Box::pin(async move {
            let limiter = self.limiters.get(rate_limit::GOOGLE_BOOKS);
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }

            let resp = client
                .get(self.volume_url(isbn))
                .timeout(timeout)
                .send()
                .await?;

            if let Err(e) = rate_limit::check_response_status(&resp) {
                if e.is_rate_limited()
                    && let Some(limiter) = limiter
                {
                    limiter.on_rate_limited();
                }
                return Err(e);
            }

            let data = json_body(resp, rate_limit::GOOGLE_BOOKS).await?;
            parse_volume(&data, isbn)
        })
    }
}

/// Details from the first volume of a search response.
pub fn parse_volume(data: &Value, isbn: &str) -> Result<BookDetails, FetchError> {
    data["items"]
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| BookDetails::from_volume_info(&item["volumeInfo"]))
        .ok_or_else(|| FetchError::Failed(format!("Google Books has no volume for ISBN {isbn}")))
}
