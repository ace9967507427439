use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{BestsellerSource, SourceFuture, json_body};
use crate::models::{Book, Category, ListContext};
use crate::rate_limit::{self, FetchError, RateLimiters};

pub const DEFAULT_BASE_URL: &str = "https://api.nytimes.com/svc/books/v3/lists/current";

/// NYT Books API client for the current bestseller lists.
///
/// The local quota is checked without waiting: when it is spent the call
/// fails with [`FetchError::RateLimited`] so the cache can serve its last copy.
pub struct NytClient {
    api_key: String,
    base_url: String,
    limiters: Arc<RateLimiters>,
}

impl NytClient {
    pub fn new(api_key: impl Into<String>, limiters: Arc<RateLimiters>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            limiters,
        }
    }

    /// Point the client at a different host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn list_url(&self, category_id: &str) -> String {
        format!(
            "{}/{}.json?api-key={}",
            self.base_url,
            urlencoding::encode(category_id),
            urlencoding::encode(&self.api_key)
        )
    }
}

impl BestsellerSource for NytClient {
    fn name(&self) -> &str {
        rate_limit::NYT
    }

    fn fetch_list<'a>(
        &'a self,
        category: &'a Category,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<Book>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(FetchError::Failed("NYT API key not configured".into()));
            }

            let limiter = self.limiters.get(rate_limit::NYT);
            if let Some(limiter) = limiter
                && let Err(wait) = limiter.try_acquire()
            {
                // Round up so a sub-second wait is never reported as 0s.
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                tracing::debug!(category = %category.id, wait_secs = secs, "NYT quota spent");
                return Err(FetchError::RateLimited {
                    retry_after: Duration::from_secs(secs.max(1)),
                });
            }

            let resp = client
                .get(self.list_url(&category.id))
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

            let data = json_body(resp, rate_limit::NYT).await?;
            parse_list(&data, category)
        })
    }
}

/// Pull the books out of a `lists/current/<category>.json` response.
pub fn parse_list(data: &Value, category: &Category) -> Result<Vec<Book>, FetchError> {
    let results = data
        .get("results")
        .filter(|r| r.is_object())
        .ok_or_else(|| FetchError::Failed("NYT: response has no results".into()))?;
    let items = results["books"]
        .as_array()
        .ok_or_else(|| FetchError::Failed("NYT: response has no book list".into()))?;

    let list_name = results["list_name"]
        .as_str()
        .or_else(|| results["display_name"].as_str())
        .unwrap_or(category.name.as_str());
    let published_date = results["published_date"]
        .as_str()
        .or_else(|| data["last_modified"].as_str())
        .unwrap_or("");

    let ctx = ListContext {
        category_id: &category.id,
        category_name: &category.name,
        list_name,
        published_date,
    };
    let books: Vec<Book> = items
        .iter()
        .filter_map(|item| Book::from_nyt(item, &ctx))
        .collect();

    if books.len() < items.len() {
        tracing::debug!(
            category = %category.id,
            skipped = items.len() - books.len(),
            "skipped NYT entries without a title"
        );
    }
    Ok(books)
}
