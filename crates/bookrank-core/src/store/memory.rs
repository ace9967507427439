use dashmap::DashMap;

/// In-process tier. Lives as long as the process; sharded so concurrent
/// readers and writers never block each other for long.
#[derive(Debug)]
pub struct MemoryLayer<T> {
    entries: DashMap<String, T>,
}

impl<T> Default for MemoryLayer<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T: Clone> MemoryLayer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: &str, value: T) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_get_overwrite() {
        let layer = MemoryLayer::new();
        assert!(layer.get("k").is_none());
        layer.set("k", 1);
        layer.set("k", 2);
        assert_eq!(layer.get("k"), Some(2));
        assert!(layer.has("k"));
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn clear_empties() {
        let layer = MemoryLayer::new();
        layer.set("a", "x".to_string());
        layer.set("b", "y".to_string());
        layer.clear();
        assert!(layer.is_empty());
        assert!(!layer.has("a"));
    }

    #[test]
    fn concurrent_writers() {
        let layer = Arc::new(MemoryLayer::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let l = layer.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        l.set(&format!("{i}-{j}"), j);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(layer.len(), 400);
    }
}
