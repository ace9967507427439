//! Scripted source for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{AwardSource, BestsellerSource, DetailsSource, SourceFuture};
use crate::models::{Award, AwardBook, Book, BookDetails, Category};
use crate::rate_limit::FetchError;

/// A configurable response for [`MockSource`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    Books(Vec<Book>),
    Details(BookDetails),
    Awards(Vec<AwardBook>),
    /// Simulate a spent quota or a 429.
    RateLimited { retry_after: Duration },
    /// Simulate a network or parse failure.
    Error(String),
}

/// A hand-rolled mock implementing every source trait.
///
/// Supports:
/// - A fixed response (used for every call), **or**
/// - A sequence of responses (one per call, repeating the last when exhausted).
/// - Optional per-call latency.
/// - Call counting via [`call_count()`](MockSource::call_count).
///
/// A call whose trait does not match the scripted payload kind fails.
pub struct MockSource {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockSource {
    /// Create a mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    ///
    /// # Panics
    /// If `responses` is empty.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reverse so pop() yields them in order.
        responses.reverse();
        let fallback = responses[0].clone();
        Self {
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(MockResponse::RateLimited { retry_after })
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self::new(MockResponse::Error(msg.into()))
    }

    /// How many times the source has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut seq = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }

    fn respond<T: Send + 'static>(
        &self,
        extract: fn(MockResponse) -> Option<T>,
    ) -> SourceFuture<'_, T> {
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match response {
                MockResponse::RateLimited { retry_after } => {
                    Err(FetchError::RateLimited { retry_after })
                }
                MockResponse::Error(msg) => Err(FetchError::Failed(msg)),
                other => extract(other)
                    .ok_or_else(|| FetchError::Failed("mock: wrong response kind".into())),
            }
        })
    }
}

impl BestsellerSource for MockSource {
    fn name(&self) -> &str {
        "Mock"
    }

    fn fetch_list<'a>(
        &'a self,
        _category: &'a Category,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<Book>> {
        self.respond(|r| match r {
            MockResponse::Books(books) => Some(books),
            _ => None,
        })
    }
}

impl DetailsSource for MockSource {
    fn name(&self) -> &str {
        "Mock"
    }

    fn fetch_details<'a>(
        &'a self,
        _isbn: &'a str,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, BookDetails> {
        self.respond(|r| match r {
            MockResponse::Details(details) => Some(details),
            _ => None,
        })
    }
}

impl AwardSource for MockSource {
    fn name(&self) -> &str {
        "Mock"
    }

    fn fetch_winners<'a>(
        &'a self,
        _award: &'a Award,
        _years: (i32, i32),
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> SourceFuture<'a, Vec<AwardBook>> {
        self.respond(|r| match r {
            MockResponse::Awards(books) => Some(books),
            _ => None,
        })
    }
}

/// A minimal bestseller entry for tests.
pub fn sample_book(title: &str, author: &str, category_id: &str, rank: u32) -> Book {
    Book {
        id: format!("isbn-{}", title.to_lowercase().replace(' ', "-")),
        title: title.to_string(),
        author: author.to_string(),
        publisher: "Test House".to_string(),
        cover: None,
        list_name: category_id.to_string(),
        category_id: category_id.to_string(),
        category_name: category_id.to_string(),
        rank,
        weeks_on_list: 1,
        rank_last_week: 0,
        published_date: "2024-01-07".to_string(),
        description: String::new(),
        buy_links: Vec::new(),
        isbn13: String::new(),
        isbn10: String::new(),
        price: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category() -> Category {
        Category::new("hardcover-fiction", "Hardcover Fiction")
    }

    #[tokio::test]
    async fn sequence_repeats_last() {
        let mock = MockSource::with_sequence(vec![
            MockResponse::Error("first".into()),
            MockResponse::Books(vec![sample_book("A", "B", "c", 1)]),
        ]);
        let client = reqwest::Client::new();
        let cat = category();
        let t = Duration::from_secs(1);

        assert!(mock.fetch_list(&cat, &client, t).await.is_err());
        assert_eq!(mock.fetch_list(&cat, &client, t).await.unwrap().len(), 1);
        assert_eq!(mock.fetch_list(&cat, &client, t).await.unwrap().len(), 1);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn wrong_kind_fails() {
        let mock = MockSource::new(MockResponse::Awards(vec![]));
        let client = reqwest::Client::new();
        let err = mock
            .fetch_details("123", &client, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Failed("mock: wrong response kind".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_applied() {
        let mock = MockSource::rate_limited(Duration::from_secs(7))
            .with_delay(Duration::from_millis(250));
        let client = reqwest::Client::new();
        let start = tokio::time::Instant::now();
        let err = mock
            .fetch_list(&category(), &client, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }
}
