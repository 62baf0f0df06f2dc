//! Shared data types from spec §3: [`Route`], dynamic segment params,
//! transform/module caches, HMR updates, and the mock request/response
//! shapes the API executor fills in.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One bound dynamic-segment value: a single decoded segment, or (for
/// catch-all / optional-catch-all) a list of segments in URL order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

pub type Params = IndexMap<String, ParamValue>;

/// A resolved App Router route (spec §3 "Route (App Router)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRoute {
    pub page: String,
    /// Outermost-first.
    pub layouts: Vec<String>,
    pub params: Params,
    pub loading: Option<String>,
    pub error: Option<String>,
    pub not_found: Option<String>,
}

/// A resolved App Router route handler (`route.ts`), spec §4.1
/// `resolveAppRouteHandler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRouteHandler {
    pub file: String,
    pub params: Params,
}

/// A resolved Pages Router page or API file (spec §4.1
/// `resolvePageFile`/`resolveApiFile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRoute {
    pub file: String,
    pub params: Params,
}

/// The dynamic-segment kinds spec §3 enumerates, used internally by
/// the route resolver's specificity ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentKind {
    /// Most specific: exact literal match.
    Static,
    Dynamic,
    OptionalCatchAll,
    CatchAll,
}

/// `TransformCacheEntry` (spec §3): cached transform output keyed by
/// source path, LRU-evicted at 500 entries.
#[derive(Debug, Clone)]
pub struct TransformCacheEntry {
    pub code: String,
    pub hash: String,
}

const TRANSFORM_CACHE_CAP: usize = 500;

/// A small LRU cache, recency-ordered via a side `VecDeque` of keys
/// rather than a full intrusive linked-hashmap crate — the teacher's
/// own transform caches (`PackageJsonCache`, import-map memoization)
/// favor a plain map plus a bookkeeping structure over pulling in a
/// dedicated LRU dependency for a single call site.
pub struct TransformCache {
    entries: Mutex<IndexMap<String, TransformCacheEntry>>,
    cap: usize,
}

impl Default for TransformCache {
    fn default() -> Self {
        Self::with_capacity(TRANSFORM_CACHE_CAP)
    }
}

impl TransformCache {
    pub fn with_capacity(cap: usize) -> Self {
        TransformCache {
            entries: Mutex::new(IndexMap::new()),
            cap,
        }
    }

    /// Returns the cached entry only if `hash` matches — a changed hash
    /// means the VFS source changed underneath the cache, so the caller
    /// must recompute (spec's "Cache coherence" invariant).
    pub fn get(&self, path: &str, hash: &str) -> Option<TransformCacheEntry> {
        let mut entries = self.entries.lock().unwrap();
        let hit = entries.get(path).map(|e| e.hash == hash).unwrap_or(false);
        if hit {
            // Touch recency: move to the back.
            if let Some(entry) = entries.shift_remove(path) {
                let code = entry.code.clone();
                let hash = entry.hash.clone();
                entries.insert(path.to_string(), TransformCacheEntry { code, hash });
                return entries.get(path).cloned();
            }
        }
        None
    }

    pub fn insert(&self, path: String, entry: TransformCacheEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.shift_remove(&path);
        entries.insert(path, entry);
        while entries.len() > self.cap {
            entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Clone for TransformCacheEntry {
    fn clone(&self) -> Self {
        TransformCacheEntry {
            code: self.code.clone(),
            hash: self.hash.clone(),
        }
    }
}

/// `VfsModule` (spec §3): a CJS module cache entry, pre-inserted before
/// execution for circular-import correctness, soft-capped FIFO at 2,000.
#[derive(Debug, Clone)]
pub struct VfsModuleEntry {
    pub exports: serde_json::Value,
    pub loaded: bool,
}

const MODULE_CACHE_CAP: usize = 2000;

pub struct ModuleCache {
    entries: Mutex<IndexMap<String, Arc<Mutex<VfsModuleEntry>>>>,
    order: Mutex<VecDeque<String>>,
    cap: usize,
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::with_capacity(MODULE_CACHE_CAP)
    }
}

impl ModuleCache {
    pub fn with_capacity(cap: usize) -> Self {
        ModuleCache {
            entries: Mutex::new(IndexMap::new()),
            order: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Mutex<VfsModuleEntry>>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Inserts the stub entry *before* execution (spec §4.5's circular
    /// dependency rule). FIFO-evicts the oldest entry when over cap,
    /// never the entry just inserted.
    pub fn insert_stub(&self, key: String) -> Arc<Mutex<VfsModuleEntry>> {
        let handle = Arc::new(Mutex::new(VfsModuleEntry {
            exports: serde_json::Value::Object(Default::default()),
            loaded: false,
        }));
        let mut entries = self.entries.lock().unwrap();
        let mut order = self.order.lock().unwrap();
        entries.insert(key.clone(), handle.clone());
        order.push_back(key);
        if entries.len() > self.cap {
            if let Some(oldest) = order.pop_front() {
                entries.shift_remove(&oldest);
            }
        }
        handle
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().unwrap().shift_remove(key);
        self.order.lock().unwrap().retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// `HMRUpdate` (spec §3/§6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrUpdateKind {
    Update,
    FullReload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmrUpdate {
    #[serde(rename = "type")]
    pub kind: HmrUpdateKind,
    pub path: String,
    pub timestamp: u64,
}

impl HmrUpdate {
    /// Classification rule from spec §4.7/§8: `.css` and source
    /// extensions are `update`, everything else is `full-reload`.
    pub fn classify(path: &str, timestamp: u64) -> HmrUpdate {
        let kind = if path.ends_with(".css")
            || path.ends_with(".jsx")
            || path.ends_with(".tsx")
            || path.ends_with(".ts")
            || path.ends_with(".js")
        {
            HmrUpdateKind::Update
        } else {
            HmrUpdateKind::FullReload
        };
        HmrUpdate {
            kind,
            path: path.to_string(),
            timestamp,
        }
    }

    /// The wire message posted to the HMR target window (spec §6.5):
    /// the update fields plus a fixed `channel` discriminator.
    pub fn to_wire_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap();
        value["channel"] = serde_json::Value::String("next-hmr".to_string());
        value
    }
}

/// `RequestContext` (spec §3): the mock request handed to API handlers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub query: IndexMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub cookies: IndexMap<String, String>,
}

impl RequestContext {
    /// Parses `cookie` header value the way spec §3 specifies: split on
    /// `;` then `=`, percent-decoded.
    pub fn parse_cookies(header_value: &str) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        for pair in header_value.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Some((k, v)) = pair.split_once('=') {
                let key = urlencoding::decode(k.trim())
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| k.trim().to_string());
                let val = urlencoding::decode(v.trim())
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| v.trim().to_string());
                out.insert(key, val);
            }
        }
        out
    }

    /// Parses the search-string portion of a URL into a flat query map.
    pub fn parse_query(url: &str) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        let Some((_, query)) = url.split_once('?') else {
            return out;
        };
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(k).map(|c| c.into_owned()).unwrap_or_else(|_| k.to_string());
            let val = urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.to_string());
            out.insert(key, val);
        }
        out
    }
}

/// `ResponseData` (spec §3): the buffered response shape a handled
/// request produces.
#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub status_code: u16,
    pub status_message: String,
    pub headers: IndexMap<String, String>,
    pub body: Vec<u8>,
}

impl ResponseData {
    pub fn with_content_length(mut self) -> Self {
        self.headers
            .insert("Content-Length".to_string(), self.body.len().to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_cache_evicts_lru() {
        let cache = TransformCache::with_capacity(2);
        cache.insert(
            "/a.ts".into(),
            TransformCacheEntry { code: "a".into(), hash: "h1".into() },
        );
        cache.insert(
            "/b.ts".into(),
            TransformCacheEntry { code: "b".into(), hash: "h1".into() },
        );
        // touch /a.ts so it becomes most-recent
        assert!(cache.get("/a.ts", "h1").is_some());
        cache.insert(
            "/c.ts".into(),
            TransformCacheEntry { code: "c".into(), hash: "h1".into() },
        );
        // /b.ts was least-recently-used and should be evicted
        assert!(cache.get("/b.ts", "h1").is_none());
        assert!(cache.get("/a.ts", "h1").is_some());
        assert!(cache.get("/c.ts", "h1").is_some());
    }

    #[test]
    fn transform_cache_misses_on_hash_change() {
        let cache = TransformCache::with_capacity(10);
        cache.insert(
            "/a.ts".into(),
            TransformCacheEntry { code: "a".into(), hash: "h1".into() },
        );
        assert!(cache.get("/a.ts", "h2").is_none());
        assert!(cache.get("/a.ts", "h1").is_some());
    }

    #[test]
    fn module_cache_fifo_evicts() {
        let cache = ModuleCache::with_capacity(2);
        cache.insert_stub("/node_modules/a/index.js".into());
        cache.insert_stub("/node_modules/b/index.js".into());
        cache.insert_stub("/node_modules/c/index.js".into());
        assert!(cache.get("/node_modules/a/index.js").is_none());
        assert!(cache.get("/node_modules/b/index.js").is_some());
        assert!(cache.get("/node_modules/c/index.js").is_some());
    }

    #[test]
    fn hmr_classifies_by_extension() {
        let update = HmrUpdate::classify("/pages/index.tsx", 1);
        assert!(matches!(update.kind, HmrUpdateKind::Update));
        let reload = HmrUpdate::classify("/public/logo.png", 1);
        assert!(matches!(reload.kind, HmrUpdateKind::FullReload));
    }

    #[test]
    fn cookie_parsing_percent_decodes() {
        let cookies = RequestContext::parse_cookies("a=1; b=hello%20world");
        assert_eq!(cookies.get("a").unwrap(), "1");
        assert_eq!(cookies.get("b").unwrap(), "hello world");
    }
}
