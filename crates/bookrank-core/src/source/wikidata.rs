use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{AwardSource, SourceFuture, json_body};
use crate::models::{Award, AwardBook};
use crate::rate_limit::{self, FetchError, RateLimiters};

pub const DEFAULT_ENDPOINT: &str = "https://query.wikidata.org/sparql";

/// Maximum winners requested per query.
pub const DEFAULT_LIMIT: u32 = 100;

const USER_AGENT: &str = concat!("BookRank/", env!("CARGO_PKG_VERSION"));

/// Wikidata SPARQL client for literary award winners.
pub struct WikidataClient {
    endpoint: String,
    limit: u32,
    limiters: Arc<RateLimiters>,
}

impl WikidataClient {
    pub fn new(limiters: Arc<RateLimiters>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            limit: DEFAULT_LIMIT,
            limiters,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }
}

impl AwardSource for WikidataClient {
    fn name(&self) -> &str {
        rate_limit::WIKIDATA
    }

    fn fetch_winners<'a>(
        &'a self,
        award: &'a Award,
        years: (i32, i32),
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> SourceFuture<'a, Vec<AwardBook>> {
        Box::pin(async move {
            let limiter = self.limiters.get(rate_limit::WIKIDATA);
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }

            let query = build_query(award.qid, years.0, years.1, self.limit);
            let resp = client
                .get(&self.endpoint)
                .query(&[("query", query.as_str()), ("format", "json")])
                .header("Accept", "application/sparql-results+json")
                .header("User-Agent", USER_AGENT)
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

            let data = json_body(resp, rate_limit::WIKIDATA).await?;
            parse_bindings(&data, award.key)
        })
    }
}

/// SPARQL for English-labelled literary works that received `qid` in the year range.
pub fn build_query(qid: &str, start_year: i32, end_year: i32, limit: u32) -> String {
    format!(
        r#"SELECT DISTINCT ?book ?bookLabel ?author ?authorLabel ?isbn13 ?isbn10
                ?publicationDate ?year ?publisher ?publisherLabel
WHERE {{
  ?book wdt:P31 wd:Q7725634 ;
        wdt:P166 wd:{qid} ;
        wdt:P1476 ?bookLabel ;
        wdt:P50 ?author ;
        wdt:P577 ?publicationDate .
  ?author rdfs:label ?authorLabel .
  FILTER(LANG(?authorLabel) = "en")
  OPTIONAL {{ ?book wdt:P212 ?isbn13 }}
  OPTIONAL {{ ?book wdt:P957 ?isbn10 }}
  OPTIONAL {{
    ?book wdt:P123 ?publisher .
    ?publisher rdfs:label ?publisherLabel .
    FILTER(LANG(?publisherLabel) = "en")
  }}
  BIND(YEAR(?publicationDate) AS ?year)
  FILTER(?year >= {start_year} && ?year <= {end_year})
  FILTER(LANG(?bookLabel) = "en")
}}
ORDER BY DESC(?year)
LIMIT {limit}"#
    )
}

/// Convert `results.bindings` to award books, dropping bindings without a title.
pub fn parse_bindings(data: &Value, award_key: &str) -> Result<Vec<AwardBook>, FetchError> {
    let bindings = data["results"]["bindings"]
        .as_array()
        .ok_or_else(|| FetchError::Failed("Wikidata: response has no bindings".into()))?;
    Ok(bindings
        .iter()
        .filter_map(|b| AwardBook::from_binding(b, award_key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_contains_award_and_years() {
        let q = build_query("Q162455", 2015, 2020, 50);
        assert!(q.contains("wdt:P166 wd:Q162455"));
        assert!(q.contains("?year >= 2015 && ?year <= 2020"));
        assert!(q.contains("ORDER BY DESC(?year)"));
        assert!(q.trim_end().ends_with("LIMIT 50"));
    }

    #[test]
    fn parses_bindings() {
        let data = json!({
            "head": {"vars": ["book", "bookLabel"]},
            "results": {"bindings": [
                {
                    "book": {"type": "uri", "value": "http://www.wikidata.org/entity/Q2"},
                    "bookLabel": {"type": "literal", "value": "Network Effect"},
                    "authorLabel": {"type": "literal", "value": "Martha Wells"},
                    "year": {"type": "literal", "value": "2020"}
                },
                {"book": {"type": "uri", "value": "http://www.wikidata.org/entity/Q3"}}
            ]}
        });
        let books = parse_bindings(&data, "nebula").unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].wikidata_id, "Q2");
        assert_eq!(books[0].year, 2020);
    }

    #[test]
    fn missing_bindings_is_failed() {
        assert!(parse_bindings(&json!({}), "hugo").is_err());
    }
}
