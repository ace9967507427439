//! Book queries served through the fetch cache.
//!
//! Each operation validates its input, builds the cache key and hands the
//! matching remote call to [`FetchCache::get_or_fetch`]. The all-categories
//! view and keyword search are assembled from the per-category `books:` lists
//! on every call; a search is stored under `search:` only when every list
//! answered without a failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::{FetchCache, FetchResult};
use crate::key::{CacheKey, normalize_isbn};
use crate::models::{AwardBook, Book, BookDetails, CachePayload, Category, find_award};
use crate::rate_limit::FetchError;
use crate::retry::{RetryPolicy, retry_unavailable};
use crate::source::{
    AwardSource, BestsellerSource, DetailsSource, GoogleBooksClient, NytClient, OpenLibraryClient,
    WikidataClient,
};
use crate::{Config, CoreError};

/// Word characters (CJK included), whitespace and dashes.
static KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w\s\-\x{4e00}-\x{9fff}]+$").expect("keyword regex is valid")
});

/// ISBN-10 (last digit may be X) or ISBN-13, separators already removed.
static ISBN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{9}[\dXx]|\d{13})$").expect("isbn regex is valid"));

/// Every configured category list, plus the newest list write time.
#[derive(Debug, Clone)]
pub struct AllCategories {
    pub lists: Vec<(Category, FetchResult<Vec<Book>>)>,
    /// Newest persisted write time among the lists, epoch seconds.
    pub latest_update: Option<u64>,
}

impl AllCategories {
    /// True if any list is degraded or unavailable.
    pub fn any_stale(&self) -> bool {
        self.lists
            .iter()
            .any(|(_, r)| r.is_stale() || r.is_unavailable())
    }
}

pub struct BookService {
    cache: Arc<FetchCache<CachePayload>>,
    bestsellers: Arc<dyn BestsellerSource>,
    details: Arc<dyn DetailsSource>,
    /// Asked only when `details` fails.
    fallback_details: Option<Arc<dyn DetailsSource>>,
    awards: Arc<dyn AwardSource>,
    client: reqwest::Client,
    timeout: Duration,
    categories: Vec<Category>,
    retry: RetryPolicy,
}

impl BookService {
    pub fn new(
        cache: Arc<FetchCache<CachePayload>>,
        bestsellers: Arc<dyn BestsellerSource>,
        details: Arc<dyn DetailsSource>,
        awards: Arc<dyn AwardSource>,
        categories: Vec<Category>,
    ) -> Self {
        Self {
            cache,
            bestsellers,
            details,
            fallback_details: None,
            awards,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(15),
            categories,
            retry: RetryPolicy::none(),
        }
    }

    /// Wire the real NYT, Google Books, Open Library and Wikidata clients from `config`.
    pub fn from_config(
        config: &Config,
        cache: Arc<FetchCache<CachePayload>>,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("BookRank/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let limiters = config.rate_limiters.clone();

        let nyt = NytClient::new(config.nyt_api_key.clone().unwrap_or_default(), limiters.clone());
        let google = GoogleBooksClient::new(config.google_api_key.clone(), limiters.clone());
        let open_library = OpenLibraryClient::new(limiters.clone());
        let wikidata = WikidataClient::new(limiters);

        Ok(Self::new(
            cache,
            Arc::new(nyt),
            Arc::new(google),
            Arc::new(wikidata),
            config.categories.clone(),
        )
        .with_fallback_details(Arc::new(open_library))
        .with_client(client)
        .with_timeout(config.request_timeout())
        .with_retry(config.retry_policy()))
    }

    pub fn with_fallback_details(mut self, source: Arc<dyn DetailsSource>) -> Self {
        self.fallback_details = Some(source);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-run unavailable lookups per `policy`. Off by default.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn cache(&self) -> &Arc<FetchCache<CachePayload>> {
        &self.cache
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// The current bestseller list for one configured category.
    pub async fn books_by_category(
        &self,
        category_id: &str,
        force_refresh: bool,
    ) -> Result<FetchResult<Vec<Book>>, CoreError> {
        let category = self
            .category(category_id)
            .ok_or_else(|| CoreError::UnknownCategory(category_id.to_string()))?;
        Ok(self.category_list(category, force_refresh).await)
    }

    async fn category_list(&self, category: &Category, force_refresh: bool) -> FetchResult<Vec<Book>> {
        self.category_list_with(&self.retry, category, force_refresh).await
    }

    async fn category_list_with(
        &self,
        policy: &RetryPolicy,
        category: &Category,
        force_refresh: bool,
    ) -> FetchResult<Vec<Book>> {
        let key = CacheKey::books(&category.id);
        let result = self
            .lookup_with(policy, &key, force_refresh, || async move {
                self.bestsellers
                    .fetch_list(category, &self.client, self.timeout)
                    .await
                    .map(CachePayload::Books)
            })
            .await;
        narrow(result, &key, CachePayload::into_books)
    }

    /// Every configured category, in configuration order.
    pub async fn all_categories(&self, force_refresh: bool) -> AllCategories {
        let mut lists = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            let result = self.category_list(category, force_refresh).await;
            lists.push((category.clone(), result));
        }
        AllCategories {
            lists,
            latest_update: self.latest_update(),
        }
    }

    /// Books whose title or author contains `keyword`, case-insensitively,
    /// across all category lists.
    ///
    /// Matches are recomputed from the lists on every call. When any list is
    /// stale or missing the partial matches come back `Degraded` with that
    /// list's error; when no list is readable at all, the last complete
    /// result stored for this keyword is served instead. The retry policy
    /// applies to the search as a whole.
    pub async fn search(
        &self,
        keyword: &str,
        force_refresh: bool,
    ) -> Result<FetchResult<Vec<Book>>, CoreError> {
        let keyword = validate_keyword(keyword)?;
        let key = CacheKey::search(&keyword);
        let needle = keyword.to_lowercase();

        Ok(retry_unavailable(&self.retry, || self.search_once(&key, &needle, force_refresh)).await)
    }

    async fn search_once(
        &self,
        key: &CacheKey,
        needle: &str,
        force_refresh: bool,
    ) -> FetchResult<Vec<Book>> {
        let single = RetryPolicy::none();
        let mut matches = Vec::new();
        let mut first_cause: Option<FetchError> = None;
        let mut any_list = false;
        let mut any_fresh = false;

        for category in &self.categories {
            let list = self.category_list_with(&single, category, force_refresh).await;
            any_fresh |= matches!(list, FetchResult::Fresh(_));
            if let Some(cause) = list.cause()
                && first_cause.is_none()
            {
                first_cause = Some(cause.clone());
            }
            if let Some(books) = list.into_value() {
                any_list = true;
                matches.extend(books.into_iter().filter(|b| b.matches(needle)));
            }
        }

        let Some(cause) = first_cause else {
            self.cache.put(key.as_str(), &CachePayload::Books(matches.clone()));
            return if any_fresh {
                FetchResult::Fresh(matches)
            } else {
                FetchResult::Cached(matches)
            };
        };
        if any_list {
            tracing::debug!(key = %key, error = %cause, "search built from incomplete lists");
            return FetchResult::Degraded {
                value: matches,
                cause,
            };
        }
        match self.cache.peek(key.as_str()).and_then(CachePayload::into_books) {
            Some(value) => {
                tracing::warn!(key = %key, error = %cause, "no list readable, serving stored search");
                FetchResult::Degraded { value, cause }
            }
            None => FetchResult::Unavailable(cause),
        }
    }

    /// Details for one ISBN, from Google Books or else the fallback source.
    pub async fn book_details(
        &self,
        isbn: &str,
        force_refresh: bool,
    ) -> Result<FetchResult<BookDetails>, CoreError> {
        let isbn = normalize_isbn(isbn);
        if !ISBN_RE.is_match(&isbn) {
            return Err(CoreError::InvalidIsbn(isbn));
        }
        let key = CacheKey::book(&isbn);

        let result = self
            .lookup(&key, force_refresh, || {
                let isbn = isbn.clone();
                async move { self.fetch_details(&isbn).await.map(CachePayload::Details) }
            })
            .await;
        Ok(narrow(result, &key, CachePayload::into_details))
    }

    /// Ask the primary details source, then the fallback if there is one.
    ///
    /// When both fail, a rate-limit error from the fallback wins so its retry
    /// hint reaches the caller; otherwise the primary's error is returned.
    async fn fetch_details(&self, isbn: &str) -> Result<BookDetails, FetchError> {
        let cause = match self.details.fetch_details(isbn, &self.client, self.timeout).await {
            Ok(details) => return Ok(details),
            Err(cause) => cause,
        };
        let Some(fallback) = &self.fallback_details else {
            return Err(cause);
        };
        tracing::debug!(
            isbn,
            source = self.details.name(),
            fallback = fallback.name(),
            error = %cause,
            "details lookup failed, trying fallback"
        );
        match fallback.fetch_details(isbn, &self.client, self.timeout).await {
            Ok(details) => Ok(details),
            Err(second) if second.is_rate_limited() => Err(second),
            Err(_) => Err(cause),
        }
    }

    /// Winners of `award_key` published between `start_year` and `end_year`, inclusive.
    pub async fn award_winners(
        &self,
        award_key: &str,
        start_year: i32,
        end_year: i32,
        force_refresh: bool,
    ) -> Result<FetchResult<Vec<AwardBook>>, CoreError> {
        let award =
            find_award(award_key).ok_or_else(|| CoreError::UnknownAward(award_key.to_string()))?;
        if start_year > end_year {
            return Err(CoreError::InvalidYearRange {
                start: start_year,
                end: end_year,
            });
        }
        let key = CacheKey::award(award.key, start_year, end_year);

        let result = self
            .lookup(&key, force_refresh, || async move {
                self.awards
                    .fetch_winners(award, (start_year, end_year), &self.client, self.timeout)
                    .await
                    .map(CachePayload::Awards)
            })
            .await;
        Ok(narrow(result, &key, CachePayload::into_awards))
    }

    /// Newest persisted write time among the category lists.
    pub fn latest_update(&self) -> Option<u64> {
        self.categories
            .iter()
            .filter_map(|c| self.cache.written_at(CacheKey::books(&c.id).as_str()))
            .max()
    }

    async fn lookup<F, Fut>(
        &self,
        key: &CacheKey,
        force_refresh: bool,
        fetch: F,
    ) -> FetchResult<CachePayload>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CachePayload, FetchError>>,
    {
        self.lookup_with(&self.retry, key, force_refresh, fetch).await
    }

    async fn lookup_with<F, Fut>(
        &self,
        policy: &RetryPolicy,
        key: &CacheKey,
        force_refresh: bool,
        fetch: F,
    ) -> FetchResult<CachePayload>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CachePayload, FetchError>>,
    {
        retry_unavailable(policy, || self.cache.get_or_fetch(key, &fetch, force_refresh)).await
    }
}

impl std::fmt::Debug for BookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookService")
            .field("bestsellers", &self.bestsellers.name())
            .field("details", &self.details.name())
            .field(
                "fallback_details",
                &self.fallback_details.as_ref().map(|s| s.name()),
            )
            .field("awards", &self.awards.name())
            .field("categories", &self.categories.len())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Trim and check a search keyword: at least two characters, words, spaces and dashes only.
pub fn validate_keyword(keyword: &str) -> Result<String, CoreError> {
    let trimmed = keyword.trim();
    if trimmed.chars().count() < 2 {
        return Err(CoreError::InvalidKeyword(
            "must be at least 2 characters".into(),
        ));
    }
    if !KEYWORD_RE.is_match(trimmed) {
        return Err(CoreError::InvalidKeyword(format!(
            "'{trimmed}' contains unsupported characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Pull one payload shape out of a cached result. A mismatched shape means
/// something else was stored under this key, which is reported as unavailable.
fn narrow<U>(
    result: FetchResult<CachePayload>,
    key: &CacheKey,
    extract: fn(CachePayload) -> Option<U>,
) -> FetchResult<U> {
    let tier = result.tier();
    let mismatch = || {
        tracing::warn!(key = %key, tier, "cached payload has unexpected kind");
        FetchError::Failed(format!("cached payload under {key} has unexpected kind"))
    };
    match result {
        FetchResult::Fresh(p) => extract(p)
            .map_or_else(|| FetchResult::Unavailable(mismatch()), FetchResult::Fresh),
        FetchResult::Cached(p) => extract(p)
            .map_or_else(|| FetchResult::Unavailable(mismatch()), FetchResult::Cached),
        FetchResult::Degraded { value, cause } => match extract(value) {
            Some(value) => FetchResult::Degraded { value, cause },
            None => FetchResult::Unavailable(cause),
        },
        FetchResult::Unavailable(cause) => FetchResult::Unavailable(cause),
    }
}
