//! Completed-render cache. Requests are fingerprinted over canonical
//! JSON (volatile keys stripped, map keys sorted by serialization) and
//! results are held under a byte ceiling with LRU eviction plus a TTL.
//! Animated renders are never served from or written to the cache, and
//! neither are errors; both policies live with the caller, which only
//! hands finished static results here.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::params::GenerationResult;

/// Strips a trailing `.webm`/`.png`/`.webp` and leading slashes, so
/// `/generate.webm` and `generate` fingerprint identically.
pub fn canonical_method(raw: &str) -> String {
    let mut method = raw;
    for suffix in [".webm", ".png", ".webp"] {
        if let Some(stripped) = method.strip_suffix(suffix) {
            method = stripped;
            break;
        }
    }
    method.trim_start_matches('/').to_owned()
}

/// Hex sha-256 over `{method, params}`. Top-level `timestamp` and `_t`
/// are dropped first; serde_json maps serialize with sorted keys, so
/// key order in the request does not change the fingerprint.
pub fn fingerprint(method: &str, params: &Value) -> String {
    let mut params = params.clone();
    if let Some(object) = params.as_object_mut() {
        object.remove("timestamp");
        object.remove("_t");
    }
    let canonical = json!({ "method": method, "params": params });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

struct CachedResult {
    result: Arc<GenerationResult>,
    weight: u64,
    stored_at: Instant,
}

struct Store {
    entries: LruCache<String, CachedResult>,
    bytes: u64,
}

pub struct ResultCache {
    store: Mutex<Store>,
    max_bytes: u64,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(max_bytes: u64, ttl: Duration) -> Self {
        Self {
            store: Mutex::new(Store {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            max_bytes,
            ttl,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<GenerationResult>> {
        let mut store = self.store.lock().ok()?;
        match store.entries.get(fingerprint) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                if let Some(stale) = store.entries.pop(fingerprint) {
                    store.bytes = store.bytes.saturating_sub(stale.weight);
                }
                None
            }
            None => None,
        }
    }

    pub fn put(&self, fingerprint: String, result: Arc<GenerationResult>) {
        let weight = weigh(&result);
        if weight > self.max_bytes {
            return;
        }
        if let Ok(mut store) = self.store.lock() {
            if let Some(previous) = store.entries.pop(&fingerprint) {
                store.bytes = store.bytes.saturating_sub(previous.weight);
            }
            store.entries.put(
                fingerprint,
                CachedResult {
                    result,
                    weight,
                    stored_at: Instant::now(),
                },
            );
            store.bytes += weight;
            while store.bytes > self.max_bytes {
                let Some((_, evicted)) = store.entries.pop_lru() else {
                    break;
                };
                store.bytes = store.bytes.saturating_sub(evicted.weight);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.store
            .lock()
            .map(|store| store.entries.len())
            .unwrap_or(0)
    }
}

fn weigh(result: &GenerationResult) -> u64 {
    (result.image.len() + std::mem::size_of::<GenerationResult>()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ImagePayload;

    fn result(bytes: usize) -> Arc<GenerationResult> {
        Arc::new(GenerationResult {
            image: ImagePayload::Binary(vec![0; bytes]),
            kind: "quote".to_owned(),
            width: 1,
            height: 1,
            ext: None,
            is_animated: false,
            duration_ms: None,
            fps: None,
            codec: None,
        })
    }

    #[test]
    fn canonical_method_strips_suffix_and_slashes() {
        assert_eq!(canonical_method("/generate.webm"), "generate");
        assert_eq!(canonical_method("quote.png"), "quote");
        assert_eq!(canonical_method("generate.webp"), "generate");
        assert_eq!(canonical_method("//generate"), "generate");
        assert_eq!(canonical_method("generate"), "generate");
    }

    #[test]
    fn fingerprint_ignores_volatile_fields() {
        let a = serde_json::json!({"messages": [{"text": "hi"}], "timestamp": 1});
        let b = serde_json::json!({"messages": [{"text": "hi"}], "_t": "0.93"});
        let c = serde_json::json!({"messages": [{"text": "hi"}]});
        assert_eq!(fingerprint("generate", &a), fingerprint("generate", &b));
        assert_eq!(fingerprint("generate", &a), fingerprint("generate", &c));
    }

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a: Value = serde_json::from_str(r#"{"width": 512, "scale": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"scale": 2, "width": 512}"#).unwrap();
        assert_eq!(fingerprint("generate", &a), fingerprint("generate", &b));
    }

    #[test]
    fn fingerprint_separates_methods_and_payloads() {
        let params = serde_json::json!({"messages": []});
        assert_ne!(fingerprint("generate", &params), fingerprint("quote", &params));
        let other = serde_json::json!({"messages": [{"text": "x"}]});
        assert_ne!(fingerprint("generate", &params), fingerprint("generate", &other));
    }

    #[test]
    fn stores_and_returns_identical_results() {
        let cache = ResultCache::new(1 << 20, Duration::from_secs(60));
        let stored = result(100);
        cache.put("abc".to_owned(), stored.clone());
        let hit = cache.get("abc").unwrap();
        assert_eq!(*hit, *stored);
    }

    #[test]
    fn entries_expire_after_the_ttl() {
        let cache = ResultCache::new(1 << 20, Duration::ZERO);
        cache.put("abc".to_owned(), result(100));
        assert!(cache.get("abc").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn byte_ceiling_evicts_least_recent() {
        let weight = weigh(&result(400));
        let cache = ResultCache::new(weight * 2, Duration::from_secs(60));
        cache.put("a".to_owned(), result(400));
        cache.put("b".to_owned(), result(400));
        // Touch "a" so "b" is the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c".to_owned(), result(400));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn oversized_results_are_never_stored() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        cache.put("a".to_owned(), result(1000));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn replacing_a_key_keeps_the_byte_count_honest() {
        let weight = weigh(&result(400));
        let cache = ResultCache::new(weight * 2, Duration::from_secs(60));
        for _ in 0..10 {
            cache.put("a".to_owned(), result(400));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_some());
    }
}
