//! Offline caching strategy per resource kind, for hosts that serve a web
//! front end and want to emit the matching client-side caching rules.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Scripts, stylesheets, fonts.
    Static,
    /// Cover images.
    Image,
    /// GET requests against the JSON API.
    ApiGet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Serve from cache; go to the network only on a miss.
    CacheFirst,
    /// Serve from cache immediately and refresh it in the background.
    StaleWhileRevalidate,
    /// Try the network; fall back to cache when offline.
    NetworkFirst,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Static,
        ResourceKind::Image,
        ResourceKind::ApiGet,
    ];

    pub fn strategy(self) -> CacheStrategy {
        match self {
            ResourceKind::Static => CacheStrategy::CacheFirst,
            ResourceKind::Image => CacheStrategy::StaleWhileRevalidate,
            ResourceKind::ApiGet => CacheStrategy::NetworkFirst,
        }
    }
}

/// One row of the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrategyRule {
    pub resource: ResourceKind,
    pub strategy: CacheStrategy,
}

pub fn strategy_table() -> Vec<StrategyRule> {
    ResourceKind::ALL
        .iter()
        .map(|&resource| StrategyRule {
            resource,
            strategy: resource.strategy(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_kinds() {
        let table = strategy_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].strategy, CacheStrategy::CacheFirst);
        assert_eq!(ResourceKind::Image.strategy(), CacheStrategy::StaleWhileRevalidate);
        assert_eq!(ResourceKind::ApiGet.strategy(), CacheStrategy::NetworkFirst);
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&strategy_table()[2]).unwrap();
        assert_eq!(json, r#"{"resource":"api_get","strategy":"network_first"}"#);
    }
}
