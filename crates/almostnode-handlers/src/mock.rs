//! Mock `req`/`res` objects handed to a handler module (spec §4.6),
//! exposed into the `boa_engine::Context` as host objects the way an
//! embedder exposes native capabilities to a sandboxed script — the
//! shape every embedded-engine reference in the pack uses for "give
//! untrusted code a req/res pair".
//!
//! Both buffered and streaming response state live behind an
//! `Arc<Mutex<ResponseState>>` so the native closures bound into the
//! JS object and the Rust-side executor observe the same mutations a
//! handler makes via `res.end()`/`res.write()` regardless of which
//! side touches it last.

use std::sync::{Arc, Mutex};

use boa_engine::object::builtins::JsArray;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsResult, JsValue, NativeFunction};
use indexmap::IndexMap;

use almostnode_core::model::{RequestContext, ResponseData};

/// Buffered or streaming response state shared between the JS-exposed
/// `res` object and the Rust executor awaiting its completion.
pub struct ResponseState {
    pub status_code: u16,
    pub status_message: String,
    pub headers: IndexMap<String, String>,
    pub body: Vec<u8>,
    pub headers_sent: bool,
    pub ended: bool,
    /// Set once per response the first time headers are frozen
    /// (first `write`/`end`) — streaming mode's `onStart` fires here.
    pub on_start: Option<Box<dyn Fn(u16, &str, &IndexMap<String, String>) + Send + Sync>>,
    pub on_chunk: Option<Box<dyn Fn(&[u8]) + Send + Sync>>,
    pub on_end: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Default for ResponseState {
    fn default() -> Self {
        ResponseState {
            status_code: 200,
            status_message: "OK".to_string(),
            headers: IndexMap::new(),
            body: Vec::new(),
            headers_sent: false,
            ended: false,
            on_start: None,
            on_chunk: None,
            on_end: None,
        }
    }
}

impl ResponseState {
    fn status_text(code: u16) -> &'static str {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            _ => "",
        }
    }

    fn freeze_headers(&mut self) {
        if self.headers_sent {
            return;
        }
        self.headers_sent = true;
        if let Some(on_start) = &self.on_start {
            on_start(self.status_code, &self.status_message, &self.headers);
        }
    }

    pub(crate) fn push_chunk(&mut self, chunk: &[u8]) {
        self.freeze_headers();
        if let Some(on_chunk) = &self.on_chunk {
            on_chunk(chunk);
        } else {
            self.body.extend_from_slice(chunk);
        }
    }

    pub(crate) fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.freeze_headers();
        self.ended = true;
        if let Some(on_end) = &self.on_end {
            on_end();
        }
    }

    pub fn to_response_data(&self) -> ResponseData {
        ResponseData {
            status_code: self.status_code,
            status_message: self.status_message.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
        .with_content_length()
    }
}

pub type SharedResponse = Arc<Mutex<ResponseState>>;

fn js_to_bytes(context: &mut Context, value: &JsValue) -> Vec<u8> {
    if let Some(s) = value.as_string() {
        return s.to_std_string_escaped().into_bytes();
    }
    if value.is_undefined() || value.is_null() {
        return Vec::new();
    }
    match value.to_json(context) {
        Ok(json) => json.to_string().into_bytes(),
        Err(_) => Vec::new(),
    }
}

/// Builds the `res` object a handler body sees: `status`, `setHeader`,
/// `getHeader`, `write`, `json`, `send`, `end`, `redirect`, `isEnded`.
/// `waitForEnd` is realized Rust-side, not as a JS method — the
/// executor polls `state.lock().unwrap().ended` after running the
/// handler's job queue rather than modelling a real `Promise` the
/// handler could itself await on, which nothing in spec §4.6's
/// surface requires a handler to do.
pub fn build_response_object(context: &mut Context, state: SharedResponse) -> JsResult<JsValue> {
    let mut builder = ObjectInitializer::new(context);

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, _context| {
            let code = args.first().and_then(|v| v.as_number()).unwrap_or(200.0) as u16;
            let mut guard = s.lock().unwrap();
            guard.status_code = code;
            guard.status_message = ResponseState::status_text(code).to_string();
            Ok(this.clone())
        }),
        js_string!("status"),
        1,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, _context| {
            let name = arg_string(args, 0);
            let value = arg_string(args, 1);
            s.lock().unwrap().headers.insert(name, value);
            Ok(this.clone())
        }),
        js_string!("setHeader"),
        2,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |_this, args, _context| {
            let name = arg_string(args, 0);
            let guard = s.lock().unwrap();
            Ok(match guard.headers.get(&name) {
                Some(v) => JsValue::from(js_string!(v.as_str())),
                None => JsValue::undefined(),
            })
        }),
        js_string!("getHeader"),
        1,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, context| {
            let chunk = js_to_bytes(context, args.first().unwrap_or(&JsValue::undefined()));
            s.lock().unwrap().push_chunk(&chunk);
            Ok(this.clone())
        }),
        js_string!("write"),
        1,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, context| {
            let body = args.first().cloned().unwrap_or(JsValue::undefined());
            let json = body.to_json(context)?;
            let text = json.to_string();
            let mut guard = s.lock().unwrap();
            guard.headers.insert("Content-Type".to_string(), "application/json".to_string());
            guard.push_chunk(text.as_bytes());
            guard.finish();
            Ok(this.clone())
        }),
        js_string!("json"),
        1,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, context| {
            let chunk = js_to_bytes(context, args.first().unwrap_or(&JsValue::undefined()));
            let mut guard = s.lock().unwrap();
            guard.push_chunk(&chunk);
            guard.finish();
            Ok(this.clone())
        }),
        js_string!("send"),
        1,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, context| {
            if let Some(chunk) = args.first() {
                let bytes = js_to_bytes(context, chunk);
                if !bytes.is_empty() {
                    s.lock().unwrap().push_chunk(&bytes);
                }
            }
            s.lock().unwrap().finish();
            Ok(this.clone())
        }),
        js_string!("end"),
        1,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |this, args, _context| {
            // `redirect(url)` or `redirect(status, url)`; 307 default.
            let (code, url) = match args.first().and_then(|v| v.as_number()) {
                Some(n) => (n as u16, arg_string(args, 1)),
                None => (307, arg_string(args, 0)),
            };
            let mut guard = s.lock().unwrap();
            guard.status_code = code;
            guard.status_message = ResponseState::status_text(code).to_string();
            guard.headers.insert("Location".to_string(), url);
            guard.finish();
            Ok(this.clone())
        }),
        js_string!("redirect"),
        2,
    );

    let s = state.clone();
    builder.function(
        NativeFunction::from_closure(move |_this, _args, _context| Ok(JsValue::from(s.lock().unwrap().ended))),
        js_string!("isEnded"),
        0,
    );

    Ok(JsValue::from(builder.build()))
}

fn arg_string(args: &[JsValue], index: usize) -> String {
    args.get(index)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}

/// Builds the `req` object a handler body sees from a resolved
/// [`RequestContext`] (spec §4.6 "Mock req").
pub fn build_request_object(context: &mut Context, req: &RequestContext) -> JsResult<JsValue> {
    // Nested objects are built first, against the same `context`,
    // before the outer `ObjectInitializer` takes it mutably — avoids
    // ever needing two live `ObjectInitializer`s borrowing one context
    // at once.
    let headers_obj = string_map_to_js(context, &req.headers);
    let query_obj = string_map_to_js(context, &req.query);
    let cookies_obj = string_map_to_js(context, &req.cookies);
    let body_value = match &req.body {
        Some(json) => json_to_js(context, json)?,
        None => JsValue::undefined(),
    };

    let mut builder = ObjectInitializer::new(context);
    builder.property(js_string!("method"), js_string!(req.method.as_str()), Attribute::all());
    builder.property(js_string!("url"), js_string!(req.url.as_str()), Attribute::all());
    builder.property(js_string!("headers"), headers_obj, Attribute::all());
    builder.property(js_string!("query"), query_obj, Attribute::all());
    builder.property(js_string!("cookies"), cookies_obj, Attribute::all());
    builder.property(js_string!("body"), body_value, Attribute::all());

    Ok(JsValue::from(builder.build()))
}

/// A small local JSON→JS conversion, the same shape as
/// `almostnode-require`'s bridge of the same name — kept separate
/// rather than exposed from that crate since the two crates convert
/// different things (module exports vs. a parsed request body) and
/// neither needs the other's call sites.
fn json_to_js(context: &mut Context, value: &serde_json::Value) -> JsResult<JsValue> {
    Ok(match value {
        serde_json::Value::Null => JsValue::null(),
        serde_json::Value::Bool(b) => JsValue::from(*b),
        serde_json::Value::Number(n) => JsValue::from(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => JsValue::from(js_string!(s.as_str())),
        serde_json::Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(json_to_js(context, item)?);
            }
            JsValue::from(JsArray::from_iter(values, context))
        }
        serde_json::Value::Object(map) => {
            // Converted before the `ObjectInitializer` borrows `context`
            // mutably, same reasoning as the headers/query/cookies
            // pre-computation in `build_request_object`.
            let mut pairs = Vec::with_capacity(map.len());
            for (key, val) in map {
                pairs.push((key.clone(), json_to_js(context, val)?));
            }
            let mut builder = ObjectInitializer::new(context);
            for (key, js_val) in pairs {
                builder.property(js_string!(key.as_str()), js_val, Attribute::all());
            }
            JsValue::from(builder.build())
        }
    })
}

fn string_map_to_js(context: &mut Context, map: &IndexMap<String, String>) -> JsValue {
    let mut builder = ObjectInitializer::new(context);
    for (k, v) in map {
        builder.property(js_string!(k.as_str()), js_string!(v.as_str()), Attribute::all());
    }
    JsValue::from(builder.build())
}

/// Array-to-JsArray helper kept for the App Route path, which builds
/// `params` as plain arrays for catch-all segments rather than the
/// `ParamValue` enum the route resolver uses internally.
pub fn params_list_to_js(context: &mut Context, values: &[String]) -> JsResult<JsValue> {
    let items: Vec<JsValue> = values.iter().map(|v| JsValue::from(js_string!(v.as_str()))).collect();
    Ok(JsValue::from(JsArray::from_iter(items, context)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn json_sets_content_type_and_ends() {
        let mut context = Context::default();
        let state: SharedResponse = Arc::new(Mutex::new(ResponseState::default()));
        let res = build_response_object(&mut context, state.clone()).unwrap();
        context
            .register_global_property(js_string!("res"), res, Attribute::all())
            .unwrap();
        context.eval(boa_engine::Source::from_bytes("res.json({ok: true})")).unwrap();
        let guard = state.lock().unwrap();
        assert!(guard.ended);
        assert_eq!(guard.headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(String::from_utf8(guard.body.clone()).unwrap(), r#"{"ok":true}"#);
    }

    #[test]
    fn redirect_defaults_to_307_and_sets_location() {
        let mut context = Context::default();
        let state: SharedResponse = Arc::new(Mutex::new(ResponseState::default()));
        let res = build_response_object(&mut context, state.clone()).unwrap();
        context
            .register_global_property(js_string!("res"), res, Attribute::all())
            .unwrap();
        context.eval(boa_engine::Source::from_bytes("res.redirect('/login')")).unwrap();
        let guard = state.lock().unwrap();
        assert_eq!(guard.status_code, 307);
        assert_eq!(guard.headers.get("Location").unwrap(), "/login");
        assert!(guard.ended);
    }

    #[test]
    fn streaming_mode_invokes_callbacks_in_order() {
        let mut context = Context::default();
        let started = Arc::new(AtomicBool::new(false));
        let chunks: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(AtomicBool::new(false));

        let mut state = ResponseState::default();
        let started_cb = started.clone();
        state.on_start = Some(Box::new(move |_code, _msg, _headers| {
            started_cb.store(true, Ordering::SeqCst);
        }));
        let chunks_cb = chunks.clone();
        state.on_chunk = Some(Box::new(move |chunk| chunks_cb.lock().unwrap().push(chunk.to_vec())));
        let ended_cb = ended.clone();
        state.on_end = Some(Box::new(move || ended_cb.store(true, Ordering::SeqCst)));

        let shared = Arc::new(Mutex::new(state));
        let res = build_response_object(&mut context, shared.clone()).unwrap();
        context
            .register_global_property(js_string!("res"), res, Attribute::all())
            .unwrap();
        context
            .eval(boa_engine::Source::from_bytes("res.write('hi'); res.end()"))
            .unwrap();

        assert!(started.load(Ordering::SeqCst));
        assert!(ended.load(Ordering::SeqCst));
        assert_eq!(chunks.lock().unwrap().as_slice(), &[b"hi".to_vec()]);
        assert!(shared.lock().unwrap().body.is_empty());
    }
}
