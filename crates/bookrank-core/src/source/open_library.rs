use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{DetailsSource, SourceFuture, json_body};
use crate::key::normalize_isbn;
use crate::models::BookDetails;
use crate::rate_limit::{self, FetchError, RateLimiters};

pub const DEFAULT_BASE_URL: &str = "https://openlibrary.org/api/books";

/// Open Library Books API lookup by ISBN. No key required.
pub struct OpenLibraryClient {
    base_url: String,
    limiters: Arc<RateLimiters>,
}

impl OpenLibraryClient {
    pub fn new(limiters: Arc<RateLimiters>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            limiters,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn books_url(&self, isbn: &str) -> String {
        format!(
            "{}?bibkeys=ISBN:{}&format=json&jscmd=data",
            self.base_url,
            urlencoding::encode(&normalize_isbn(isbn))
        )
    }
}

impl DetailsSource for OpenLibraryClient {
    fn name(&self) -> &str {
        rate_limit::OPEN_LIBRARY
    }

    fn fetch_details<'a>(
        &'a self,
        isbn: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, BookDetails> {
        Box::pin(async move {
            let limiter = self.limiters.get(rate_limit::OPEN_LIBRARY);
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }

            let resp = client
                .get(self.books_url(isbn))
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

            let data = json_body(resp, rate_limit::OPEN_LIBRARY).await?;
            parse_books(&data, isbn)
        })
    }
}

/// Details from a `jscmd=data` response, which is keyed by `ISBN:<isbn>`.
pub fn parse_books(data: &Value, isbn: &str) -> Result<BookDetails, FetchError> {
    let isbn = normalize_isbn(isbn);
    data.get(format!("ISBN:{isbn}"))
        .and_then(|record| BookDetails::from_open_library(record, &isbn))
        .ok_or_else(|| FetchError::Failed(format!("Open Library has no record for ISBN {isbn}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_record_under_bibkey() {
        let data = json!({
            "ISBN:9780441013593": {
                "title": "Dune",
                "authors": [{"name": "Frank Herbert", "url": "https://openlibrary.org/authors/OL79034A"}],
                "publishers": [{"name": "Ace Books"}],
                "publish_date": "2005",
                "number_of_pages": 528,
                "cover": {"small": "http://covers.openlibrary.org/b/id/1-S.jpg", "large": "http://covers.openlibrary.org/b/id/1-L.jpg"},
                "description": {"type": "/type/text", "value": "Desert planet."}
            }
        });
        let details = parse_books(&data, "978-0441013593").unwrap();
        assert_eq!(details.title, "Dune");
        assert_eq!(details.authors, ["Frank Herbert"]);
        assert_eq!(details.publisher.as_deref(), Some("Ace Books"));
        assert_eq!(details.page_count, Some(528));
        assert_eq!(details.description.as_deref(), Some("Desert planet."));
        assert_eq!(
            details.cover_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/1-L.jpg")
        );
        assert_eq!(details.isbn13.as_deref(), Some("9780441013593"));
        assert_eq!(details.isbn10, None);
    }

    #[test]
    fn plain_string_description_and_listed_identifiers() {
        let data = json!({
            "ISBN:0441013597": {
                "title": "Dune",
                "description": "Desert planet.",
                "identifiers": {"isbn_13": ["9780441013593"], "isbn_10": ["0441013597"]}
            }
        });
        let details = parse_books(&data, "0441013597").unwrap();
        assert_eq!(details.description.as_deref(), Some("Desert planet."));
        assert_eq!(details.isbn13.as_deref(), Some("9780441013593"));
        assert_eq!(details.isbn10.as_deref(), Some("0441013597"));
    }

    #[test]
    fn empty_response_is_failed() {
        let err = parse_books(&json!({}), "123456789X").unwrap_err();
        assert_eq!(
            err,
            FetchError::Failed("Open Library has no record for ISBN 123456789X".into())
        );
    }

    #[test]
    fn url_uses_bibkey_and_data_view() {
        let client = OpenLibraryClient::new(Arc::new(RateLimiters::default()));
        assert_eq!(
            client.books_url("978-0441013593"),
            format!("{DEFAULT_BASE_URL}?bibkeys=ISBN:9780441013593&format=json&jscmd=data")
        );
    }
}
