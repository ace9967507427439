//! Remote source traits and the HTTP clients implementing them.
//!
//! A source returns validated records or a [`FetchError`]; it never touches
//! the cache. Rate-limit errors carry the retry hint the cache passes through.

pub mod google_books;
pub mod mock;
pub mod nyt;
pub mod open_library;
pub mod wikidata;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{Award, AwardBook, Book, BookDetails, Category};
use crate::rate_limit::FetchError;

pub use google_books::GoogleBooksClient;
pub use nyt::NytClient;
pub use open_library::OpenLibraryClient;
pub use wikidata::WikidataClient;

/// Boxed future returned by every source call.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'a>>;

/// Produces the current bestseller list for one category.
pub trait BestsellerSource: Send + Sync {
    /// The remote's display name (e.g. "NYT").
    fn name(&self) -> &str;

    fn fetch_list<'a>(
        &'a self,
        category: &'a Category,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<Book>>;
}

/// Looks up details for a single ISBN.
pub trait DetailsSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Failed` when the remote has no record for `isbn`.
    fn fetch_details<'a>(
        &'a self,
        isbn: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, BookDetails>;
}

/// Lists the books that won an award within a range of years.
pub trait AwardSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_winners<'a>(
        &'a self,
        award: &'a Award,
        years: (i32, i32),
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<AwardBook>>;
}

/// Decode a response body as JSON, mapping failures to [`FetchError::Failed`].
pub(crate) async fn json_body(
    resp: reqwest::Response,
    remote: &str,
) -> Result<serde_json::Value, FetchError> {
    resp.json()
        .await
        .map_err(|e| FetchError::Failed(format!("{remote}: malformed response body: {e}")))
}
