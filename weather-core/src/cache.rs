use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::RwLock;
use tracing::debug;

use crate::model::WeatherReading;

/// Last successful reading per city.
///
/// Keys are city names exactly as the caller supplied them (case-sensitive).
/// Only provider successes are written; fallback reads never mutate the cache.
pub trait ReadingCache: Send + Sync + Debug {
    fn get(&self, city: &str) -> Option<WeatherReading>;

    fn put(&self, city: &str, reading: WeatherReading);
}

/// Process-local cache with no expiry; an entry lives until overwritten.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, WeatherReading>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ReadingCache for InMemoryCache {
    fn get(&self, city: &str) -> Option<WeatherReading> {
        self.entries.read().get(city).copied()
    }

    fn put(&self, city: &str, reading: WeatherReading) {
        let mut entries = self.entries.write();
        match entries.get_mut(city) {
            Some(existing) if *existing == reading => {}
            Some(existing) => {
                debug!(city, ?reading, "Replacing cached reading");
                *existing = reading;
            }
            None => {
                debug!(city, ?reading, "Caching first reading");
                entries.insert(city.to_owned(), reading);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_empty_cache_misses() {
        let cache = InMemoryCache::new();
        assert!(cache.get("Sydney").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn put_is_last_write_wins() {
        let cache = InMemoryCache::new();
        cache.put("Sydney", WeatherReading::new(25.0, 10.0));
        cache.put("Sydney", WeatherReading::new(20.0, 5.0));

        assert_eq!(cache.get("Sydney"), Some(WeatherReading::new(20.0, 5.0)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let cache = InMemoryCache::new();
        cache.put("Sydney", WeatherReading::new(25.0, 10.0));

        assert!(cache.get("sydney").is_none());
        assert!(cache.get("Sydney").is_some());
    }

    #[test]
    fn concurrent_puts_leave_one_of_the_written_values() {
        let cache = std::sync::Arc::new(InMemoryCache::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.put("Perth", WeatherReading::new(i as f64, 1.0)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = cache.get("Perth").unwrap();
        assert!((0..8).any(|i| stored == WeatherReading::new(i as f64, 1.0)));
        assert_eq!(cache.len(), 1);
    }
}
