//! Record shapes returned by the remote sources and stored in the cache.
//!
//! Remote JSON is validated here, at the source boundary, so everything past
//! this point works with typed records instead of loose maps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A purchase link attached to a bestseller entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyLink {
    pub name: String,
    pub url: String,
}

/// One entry of a bestseller list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Primary ISBN (13 preferred, else 10). Empty when the list carries neither.
    pub id: String,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub cover: Option<String>,
    pub list_name: String,
    pub category_id: String,
    pub category_name: String,
    pub rank: u32,
    pub weeks_on_list: u32,
    /// 0 when the book was not on last week's list.
    pub rank_last_week: u32,
    pub published_date: String,
    pub description: String,
    pub buy_links: Vec<BuyLink>,
    pub isbn13: String,
    pub isbn10: String,
    /// `None` for the zero price NYT reports when unknown.
    pub price: Option<String>,
}

impl Book {
    /// Build a book from one element of the NYT `results.books` array.
    ///
    /// Returns `None` for entries without a title.
    pub fn from_nyt(item: &Value, list: &ListContext<'_>) -> Option<Self> {
        let title = item["title"].as_str().map(str::trim).unwrap_or("");
        if title.is_empty() {
            return None;
        }

        let isbn13 = item["primary_isbn13"].as_str().unwrap_or("").to_string();
        let isbn10 = item["primary_isbn10"].as_str().unwrap_or("").to_string();
        let id = if isbn13.is_empty() {
            isbn10.clone()
        } else {
            isbn13.clone()
        };

        let price = match &item["price"] {
            Value::String(s) => s.parse::<f64>().ok().filter(|p| *p > 0.0).map(|_| s.clone()),
            Value::Number(n) => n.as_f64().filter(|p| *p > 0.0).map(|p| p.to_string()),
            _ => None,
        };

        let buy_links = item["buy_links"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|link| {
                        let url = link["url"].as_str().filter(|u| !u.is_empty())?;
                        Some(BuyLink {
                            name: link["name"].as_str().unwrap_or("").to_string(),
                            url: url.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Book {
            id,
            title: title.to_string(),
            author: text_or(item, "author", "Unknown Author"),
            publisher: text_or(item, "publisher", "Unknown Publisher"),
            cover: item["book_image"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(String::from),
            list_name: list.list_name.to_string(),
            category_id: list.category_id.to_string(),
            category_name: list.category_name.to_string(),
            rank: as_u32(&item["rank"]),
            weeks_on_list: as_u32(&item["weeks_on_list"]),
            rank_last_week: as_u32(&item["rank_last_week"]),
            published_date: list.published_date.to_string(),
            description: text_or(item, "description", "No summary available."),
            buy_links,
            isbn13,
            isbn10,
            price,
        })
    }

    /// Case-insensitive keyword match against title or author.
    pub fn matches(&self, keyword_lower: &str) -> bool {
        self.title.to_lowercase().contains(keyword_lower)
            || self.author.to_lowercase().contains(keyword_lower)
    }
}

/// List-level fields shared by every book in one NYT response.
#[derive(Debug, Clone, Copy)]
pub struct ListContext<'a> {
    pub category_id: &'a str,
    pub category_name: &'a str,
    pub list_name: &'a str,
    pub published_date: &'a str,
}

/// Per-ISBN details from Google Books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDetails {
    pub title: String,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    pub page_count: Option<u32>,
    pub language: Option<String>,
    pub cover_url: Option<String>,
    pub isbn13: Option<String>,
    pub isbn10: Option<String>,
}

impl BookDetails {
    /// Build details from a Google Books `volumeInfo` object.
    pub fn from_volume_info(info: &Value) -> Option<Self> {
        let title = info["title"].as_str().filter(|t| !t.trim().is_empty())?;

        let links = &info["imageLinks"];
        let cover_url = ["extraLarge", "large", "medium", "small", "thumbnail", "smallThumbnail"]
            .iter()
            .find_map(|size| links[*size].as_str())
            .map(force_https);

        let language = info["language"]
            .as_str()
            .filter(|l| !l.is_empty())
            .map(|code| language_name(&code.to_lowercase()));

        Some(BookDetails {
            title: title.to_string(),
            authors: info["authors"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            publisher: info["publisher"].as_str().map(String::from),
            published_date: info["publishedDate"].as_str().map(String::from),
            description: info["description"].as_str().map(String::from),
            page_count: info["pageCount"].as_u64().and_then(|n| u32::try_from(n).ok()),
            language,
            cover_url,
            isbn13: industry_identifier(info, "ISBN_13"),
            isbn10: industry_identifier(info, "ISBN_10"),
        })
    }

    /// Build details from one Open Library `jscmd=data` record looked up by `isbn`.
    pub fn from_open_library(record: &Value, isbn: &str) -> Option<Self> {
        let title = record["title"].as_str().filter(|t| !t.trim().is_empty())?;

        let cover = &record["cover"];
        let cover_url = ["large", "medium", "small"]
            .iter()
            .find_map(|size| cover[*size].as_str())
            .map(force_https);

        // Either a plain string or {"type": ..., "value": ...}
        let description = match &record["description"] {
            Value::String(text) => Some(text.clone()),
            other => other["value"].as_str().map(String::from),
        };

        let identifier = |kind: &str, len: usize| {
            record["identifiers"][kind][0]
                .as_str()
                .map(String::from)
                .or_else(|| (isbn.len() == len).then(|| isbn.to_string()))
        };

        Some(BookDetails {
            title: title.to_string(),
            authors: record["authors"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a["name"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            publisher: record["publishers"][0]["name"].as_str().map(String::from),
            published_date: record["publish_date"].as_str().map(String::from),
            description,
            page_count: record["number_of_pages"]
                .as_u64()
                .and_then(|n| u32::try_from(n).ok()),
            language: None,
            cover_url,
            isbn13: identifier("isbn_13", 13),
            isbn10: identifier("isbn_10", 10),
        })
    }
}

/// A book that won a literary award, from Wikidata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardBook {
    pub award: String,
    pub wikidata_id: String,
    pub title: String,
    pub author: String,
    pub isbn13: Option<String>,
    pub isbn10: Option<String>,
    pub publication_date: String,
    pub year: i32,
    pub publisher: Option<String>,
}

impl AwardBook {
    /// Build a record from one SPARQL result binding.
    pub fn from_binding(binding: &Value, award_key: &str) -> Option<Self> {
        let title = binding_value(binding, "bookLabel").filter(|t| !t.is_empty())?;
        Some(AwardBook {
            award: award_key.to_string(),
            wikidata_id: last_path_segment(binding_value(binding, "book").unwrap_or("")),
            title: title.to_string(),
            author: binding_value(binding, "authorLabel")
                .unwrap_or("")
                .to_string(),
            isbn13: binding_value(binding, "isbn13")
                .filter(|s| !s.is_empty())
                .map(String::from),
            isbn10: binding_value(binding, "isbn10")
                .filter(|s| !s.is_empty())
                .map(String::from),
            publication_date: binding_value(binding, "publicationDate")
                .unwrap_or("")
                .to_string(),
            year: binding_value(binding, "year")
                .and_then(|y| y.parse().ok())
                .unwrap_or(0),
            publisher: binding_value(binding, "publisherLabel")
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }
}

/// A literary award known to the Wikidata source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Award {
    pub key: &'static str,
    pub qid: &'static str,
    pub name: &'static str,
}

pub const AWARDS: &[Award] = &[
    Award { key: "nebula", qid: "Q327503", name: "Nebula Award" },
    Award { key: "hugo", qid: "Q162455", name: "Hugo Award" },
    Award { key: "booker", qid: "Q155091", name: "Booker Prize" },
    Award { key: "international_booker", qid: "Q2519161", name: "International Booker Prize" },
    Award { key: "pulitzer_fiction", qid: "Q162530", name: "Pulitzer Prize for Fiction" },
    Award { key: "edgar", qid: "Q532244", name: "Edgar Award" },
    Award { key: "nobel_literature", qid: "Q37922", name: "Nobel Prize in Literature" },
];

/// Look up an award by key.
pub fn find_award(key: &str) -> Option<&'static Award> {
    AWARDS.iter().find(|a| a.key == key)
}

/// A bestseller category (NYT list name) and its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The four lists shown when no categories are configured.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new("hardcover-fiction", "Hardcover Fiction"),
        Category::new("hardcover-nonfiction", "Hardcover Nonfiction"),
        Category::new("trade-fiction-paperback", "Paperback Trade Fiction"),
        Category::new("paperback-nonfiction", "Paperback Nonfiction"),
    ]
}

/// Everything the cache stores, one variant per record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CachePayload {
    Books(Vec<Book>),
    Details(BookDetails),
    Awards(Vec<AwardBook>),
}

impl CachePayload {
    pub fn into_books(self) -> Option<Vec<Book>> {
        match self {
            CachePayload::Books(books) => Some(books),
            _ => None,
        }
    }

    pub fn into_details(self) -> Option<BookDetails> {
        match self {
            CachePayload::Details(details) => Some(details),
            _ => None,
        }
    }

    pub fn into_awards(self) -> Option<Vec<AwardBook>> {
        match self {
            CachePayload::Awards(books) => Some(books),
            _ => None,
        }
    }
}

fn text_or(item: &Value, field: &str, fallback: &str) -> String {
    item[field]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn as_u32(v: &Value) -> u32 {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn force_https(url: &str) -> String {
    match url.strip_prefix("http:") {
        Some(rest) => format!("https:{rest}"),
        None => url.to_string(),
    }
}

fn industry_identifier(info: &Value, kind: &str) -> Option<String> {
    info["industryIdentifiers"]
        .as_array()?
        .iter()
        .find(|id| id["type"].as_str() == Some(kind))
        .and_then(|id| id["identifier"].as_str())
        .map(String::from)
}

fn language_name(code: &str) -> String {
    match code {
        "en" => "English",
        "zh" => "Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        other => return other.to_string(),
    }
    .to_string()
}

fn binding_value<'a>(binding: &'a Value, field: &str) -> Option<&'a str> {
    binding[field]["value"].as_str()
}

fn last_path_segment(uri: &str) -> String {
    uri.rsplit('/').next().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ListContext<'static> {
        ListContext {
            category_id: "hardcover-fiction",
            category_name: "Hardcover Fiction",
            list_name: "Hardcover Fiction",
            published_date: "2024-05-12",
        }
    }

    #[test]
    fn book_from_nyt_full_entry() {
        let item = json!({
            "title": "THE WOMEN",
            "author": "Kristin Hannah",
            "publisher": "St. Martin's",
            "rank": 1,
            "rank_last_week": 2,
            "weeks_on_list": 14,
            "primary_isbn13": "9781250178633",
            "primary_isbn10": "1250178630",
            "price": "0.00",
            "book_image": "https://example.org/cover.jpg",
            "buy_links": [
                {"name": "Amazon", "url": "https://amazon.example/x"},
                {"name": "Broken", "url": ""}
            ]
        });
        let book = Book::from_nyt(&item, &ctx()).unwrap();
        assert_eq!(book.id, "9781250178633");
        assert_eq!(book.rank, 1);
        assert_eq!(book.rank_last_week, 2);
        assert_eq!(book.price, None);
        assert_eq!(book.buy_links.len(), 1);
        assert_eq!(book.description, "No summary available.");
        assert_eq!(book.category_id, "hardcover-fiction");
    }

    #[test]
    fn book_without_title_is_rejected() {
        assert!(Book::from_nyt(&json!({"author": "Nobody"}), &ctx()).is_none());
    }

    #[test]
    fn book_falls_back_to_isbn10() {
        let item = json!({"title": "X", "primary_isbn10": "0000000000", "price": 27.99});
        let book = Book::from_nyt(&item, &ctx()).unwrap();
        assert_eq!(book.id, "0000000000");
        assert_eq!(book.price.as_deref(), Some("27.99"));
    }

    #[test]
    fn book_matches_title_or_author() {
        let item = json!({"title": "Fourth Wing", "author": "Rebecca Yarros"});
        let book = Book::from_nyt(&item, &ctx()).unwrap();
        assert!(book.matches("wing"));
        assert!(book.matches("yarros"));
        assert!(!book.matches("dune"));
    }

    #[test]
    fn details_from_volume_info() {
        let info = json!({
            "title": "Dune",
            "authors": ["Frank Herbert"],
            "language": "EN",
            "pageCount": 412,
            "imageLinks": {"thumbnail": "http://books.example/dune.jpg"},
            "industryIdentifiers": [
                {"type": "ISBN_10", "identifier": "0441013597"},
                {"type": "ISBN_13", "identifier": "9780441013593"}
            ]
        });
        let details = BookDetails::from_volume_info(&info).unwrap();
        assert_eq!(details.language.as_deref(), Some("English"));
        assert_eq!(details.cover_url.as_deref(), Some("https://books.example/dune.jpg"));
        assert_eq!(details.isbn13.as_deref(), Some("9780441013593"));
        assert_eq!(details.page_count, Some(412));
    }

    #[test]
    fn award_book_from_binding() {
        let binding = json!({
            "book": {"value": "http://www.wikidata.org/entity/Q123"},
            "bookLabel": {"value": "The Ministry for the Future"},
            "authorLabel": {"value": "Kim Stanley Robinson"},
            "year": {"value": "2021"},
            "isbn13": {"value": ""}
        });
        let book = AwardBook::from_binding(&binding, "hugo").unwrap();
        assert_eq!(book.wikidata_id, "Q123");
        assert_eq!(book.year, 2021);
        assert_eq!(book.isbn13, None);
        assert_eq!(book.award, "hugo");
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = CachePayload::Awards(vec![]);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, json!({"kind": "awards", "data": []}));
        let back: CachePayload = serde_json::from_value(json).unwrap();
        assert!(back.into_awards().unwrap().is_empty());
    }

    #[test]
    fn find_award_by_key() {
        assert_eq!(find_award("booker").unwrap().qid, "Q155091");
        assert!(find_award("oscar").is_none());
    }
}
