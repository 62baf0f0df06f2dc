//! Evaluates an API handler module and drives it to completion (spec
//! §4.6): Pages API classic req/res handlers and App Router `route.ts`
//! Web-Request/Response handlers both funnel through [`HandlerExecutor`].
//!
//! The 30-second timeout is realized the way the spec's own realization
//! note calls for: the boa evaluation (synchronous, blocking Rust) runs
//! on a `tokio::task::spawn_blocking` thread, and `tokio::time::timeout`
//! races that thread's completion signal — there's no true cooperative
//! cancellation of a running `Context::eval`, mirroring that the spec's
//! own "single-threaded cooperative" scheduling model has no preemption
//! either; a timeout here means the *dev server* stops waiting, not that
//! the stray evaluation is interrupted mid-flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, Source};

use almostnode_core::model::{Params, RequestContext, ResponseData};
use almostnode_core::route::is_http_method_export;
use almostnode_core::CoreError;
use almostnode_require::{BuiltinProvider, VfsRequire};
use almostnode_transforms::pipeline::{transform_for_handler, PipelineOptions};
use almostnode_vfs::Vfs;

use crate::builtins::NodeBuiltins;
use crate::mock::{build_request_object, build_response_object, ResponseState, SharedResponse};

const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// A minimal `Response`/`ReadableStream` pair evaluated into every App
/// Route `Context` before the handler module runs. `boa_engine` has no
/// builtin Fetch API; this gives `route.ts` handlers that return
/// `new Response(new ReadableStream({ start(controller) { ... } }))`
/// (spec §4.6's streaming scenario) something real to construct,
/// backed by a plain array the executor can read back out afterwards
/// rather than a true backpressure-aware stream.
const RESPONSE_STREAM_PRELUDE: &str = r#"
class ReadableStream {
  constructor(underlyingSource) {
    this.__chunks = [];
    this.__closed = false;
    const controller = {
      enqueue: (chunk) => { this.__chunks.push(chunk); },
      close: () => { this.__closed = true; },
      error: (err) => { this.__closed = true; this.__error = err; },
    };
    if (underlyingSource && typeof underlyingSource.start === 'function') {
      underlyingSource.start(controller);
    }
  }
}
class Response {
  constructor(body, init) {
    init = init || {};
    this.status = init.status || 200;
    this.headers = init.headers || {};
    this._bodyInit = body;
  }
}
class TextEncoder {
  encode(str) {
    str = String(str);
    const bytes = [];
    for (let i = 0; i < str.length; i++) bytes.push(str.charCodeAt(i) & 0xff);
    return bytes;
  }
}
function __settlePromise(value, holder) {
  if (value && typeof value.then === 'function') {
    value.then(
      (v) => { holder.settled = true; holder.rejected = false; holder.value = v; },
      (e) => { holder.settled = true; holder.rejected = true; holder.value = e; }
    );
  } else {
    holder.settled = true;
    holder.rejected = false;
    holder.value = value;
  }
}
"#;

/// What a handler call produces before it's turned into bytes on the
/// wire — kept distinct from [`ResponseData`] so streaming callbacks
/// can be wired in before the handler runs rather than after.
pub enum HandlerOutcome {
    Buffered(ResponseData),
    /// The handler's evaluation already drove `onStart`/`onChunk`/`onEnd`
    /// directly; nothing further to serialize.
    Streamed,
}

pub struct HandlerExecutor {
    vfs: Arc<dyn Vfs>,
    module_cache: Arc<almostnode_core::model::ModuleCache>,
    env: HashMap<String, String>,
    aliases: Vec<(String, String)>,
}

impl HandlerExecutor {
    pub fn new(
        vfs: Arc<dyn Vfs>,
        env: HashMap<String, String>,
        cors_proxy: Option<String>,
        aliases: Vec<(String, String)>,
    ) -> Self {
        let mut env = env;
        if let Some(proxy) = cors_proxy {
            env.entry("CORS_PROXY_URL".to_string()).or_insert(proxy);
        }
        HandlerExecutor {
            vfs,
            module_cache: Arc::new(almostnode_core::model::ModuleCache::default()),
            env,
            aliases,
        }
    }

    fn requirer(&self) -> VfsRequire {
        let builtins: Arc<dyn BuiltinProvider> = Arc::new(NodeBuiltins { vfs: self.vfs.clone() });
        VfsRequire::new(self.vfs.clone(), self.module_cache.clone(), builtins)
    }

    /// Real `aliases` threaded from the server, rather than
    /// `PipelineOptions::default()` (which would resolve no aliases at
    /// all for handler source).
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            aliases: self.aliases.clone(),
            ..Default::default()
        }
    }

    /// Pages API classic handler (buffered `res`), spec §4.6's primary
    /// execution path.
    pub async fn run_api_handler(
        &self,
        file: &str,
        req: RequestContext,
    ) -> Result<HandlerOutcome, CoreError> {
        let source = self
            .vfs
            .read_file_utf8(file)
            .map_err(|e| CoreError::HandlerError(e.to_string()))?;
        let code = transform_for_handler(&source, file, &self.pipeline_options());

        let requirer = self.requirer();
        let env = self.env.clone();
        let dir = almostnode_vfs::dirname(file);
        let state: SharedResponse = Arc::new(Mutex::new(ResponseState::default()));
        let state_for_thread = state.clone();

        let join = tokio::task::spawn_blocking(move || {
            run_classic_handler_body(&requirer, &dir, &env, &code, req, state_for_thread)
        });

        match tokio::time::timeout(HANDLER_TIMEOUT, join).await {
            Ok(Ok(Ok(()))) => Ok(HandlerOutcome::Buffered(state.lock().unwrap().to_response_data())),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => Err(CoreError::HandlerError(join_err.to_string())),
            Err(_) => Err(CoreError::HandlerTimeout),
        }
    }

    /// Streaming variant: identical evaluation, but `res` pipes through
    /// the caller's `onStart`/`onChunk`/`onEnd` instead of buffering.
    pub async fn run_api_handler_streaming(
        &self,
        file: &str,
        req: RequestContext,
        on_start: impl Fn(u16, &str, &indexmap::IndexMap<String, String>) + Send + Sync + 'static,
        on_chunk: impl Fn(&[u8]) + Send + Sync + 'static,
        on_end: impl Fn() + Send + Sync + 'static,
    ) -> Result<HandlerOutcome, CoreError> {
        let source = self
            .vfs
            .read_file_utf8(file)
            .map_err(|e| CoreError::HandlerError(e.to_string()))?;
        let code = transform_for_handler(&source, file, &self.pipeline_options());

        let requirer = self.requirer();
        let env = self.env.clone();
        let dir = almostnode_vfs::dirname(file);

        let mut response_state = ResponseState::default();
        response_state.on_start = Some(Box::new(on_start));
        response_state.on_chunk = Some(Box::new(on_chunk));
        response_state.on_end = Some(Box::new(on_end));
        let state: SharedResponse = Arc::new(Mutex::new(response_state));
        let state_for_thread = state.clone();

        let join = tokio::task::spawn_blocking(move || {
            run_classic_handler_body(&requirer, &dir, &env, &code, req, state_for_thread)
        });

        match tokio::time::timeout(HANDLER_TIMEOUT, join).await {
            Ok(Ok(Ok(()))) => Ok(HandlerOutcome::Streamed),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => Err(CoreError::HandlerError(join_err.to_string())),
            Err(_) => {
                state.lock().unwrap().finish();
                Err(CoreError::HandlerTimeout)
            }
        }
    }

    /// App Router `route.ts` handler (spec §4.6's second path): picks
    /// the exported function matching `req.method`, evaluates the
    /// module fresh (no factory caching — only transitive `require()`s
    /// still benefit from the module cache).
    pub async fn run_app_route_handler(
        &self,
        file: &str,
        req: RequestContext,
        params: Params,
    ) -> Result<HandlerOutcome, CoreError> {
        let source = self
            .vfs
            .read_file_utf8(file)
            .map_err(|e| CoreError::HandlerError(e.to_string()))?;
        let code = transform_for_handler(&source, file, &self.pipeline_options());

        let requirer = self.requirer();
        let dir = almostnode_vfs::dirname(file);
        let state: SharedResponse = Arc::new(Mutex::new(ResponseState::default()));
        let state_for_thread = state.clone();

        let join = tokio::task::spawn_blocking(move || {
            run_route_handler_body(&requirer, &dir, &code, req, &params, state_for_thread)
        });

        match tokio::time::timeout(HANDLER_TIMEOUT, join).await {
            Ok(Ok(Ok(()))) => Ok(HandlerOutcome::Buffered(state.lock().unwrap().to_response_data())),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => Err(CoreError::HandlerError(join_err.to_string())),
            Err(_) => Err(CoreError::HandlerTimeout),
        }
    }

    /// Streaming variant of [`Self::run_app_route_handler`]: a returned
    /// `new Response(new ReadableStream(...))` delivers its chunks via
    /// the caller's callbacks as they were enqueued rather than as one
    /// buffered body.
    pub async fn run_app_route_handler_streaming(
        &self,
        file: &str,
        req: RequestContext,
        params: Params,
        on_start: impl Fn(u16, &str, &indexmap::IndexMap<String, String>) + Send + Sync + 'static,
        on_chunk: impl Fn(&[u8]) + Send + Sync + 'static,
        on_end: impl Fn() + Send + Sync + 'static,
    ) -> Result<HandlerOutcome, CoreError> {
        let source = self
            .vfs
            .read_file_utf8(file)
            .map_err(|e| CoreError::HandlerError(e.to_string()))?;
        let code = transform_for_handler(&source, file, &self.pipeline_options());

        let requirer = self.requirer();
        let dir = almostnode_vfs::dirname(file);

        let mut response_state = ResponseState::default();
        response_state.on_start = Some(Box::new(on_start));
        response_state.on_chunk = Some(Box::new(on_chunk));
        response_state.on_end = Some(Box::new(on_end));
        let state: SharedResponse = Arc::new(Mutex::new(response_state));
        let state_for_thread = state.clone();

        let join = tokio::task::spawn_blocking(move || {
            run_route_handler_body_streaming(&requirer, &dir, &code, req, &params, state_for_thread)
        });

        match tokio::time::timeout(HANDLER_TIMEOUT, join).await {
            Ok(Ok(Ok(()))) => Ok(HandlerOutcome::Streamed),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => Err(CoreError::HandlerError(join_err.to_string())),
            Err(_) => {
                state.lock().unwrap().finish();
                Err(CoreError::HandlerTimeout)
            }
        }
    }
}

/// Runs the handler body for the classic `(req, res)` calling
/// convention: `module.exports.default ?? module.exports`, unwrapping
/// one further `.default` if the transpiled default export nested
/// (spec §4.6's exact unwrap rule for interop with `export default`
/// that itself got double-wrapped by the CJS transform).
fn run_classic_handler_body(
    requirer: &VfsRequire,
    dir: &str,
    env: &HashMap<String, String>,
    code: &str,
    req: RequestContext,
    state: SharedResponse,
) -> Result<(), CoreError> {
    let mut context = Context::default();
    let module_value = install_module_scaffold(&mut context, requirer, dir, env, code)?;

    let handler = resolve_default_export(&mut context, &module_value)?;
    let Some(handler_fn) = handler.as_callable() else {
        return Err(CoreError::HandlerError("handler module has no callable default export".to_string()));
    };

    let req_obj = build_request_object(&mut context, &req).map_err(js_to_core_error)?;
    let res_obj = build_response_object(&mut context, state.clone()).map_err(js_to_core_error)?;

    handler_fn
        .call(&boa_engine::JsValue::undefined(), &[req_obj, res_obj], &mut context)
        .map_err(js_to_core_error)?;

    // Drain any microtasks the handler queued (e.g. a `Promise.resolve().then(...)`
    // that calls `res.end()`), the nearest this embedding comes to the
    // spec's `await res.waitForEnd()`.
    context.run_jobs();

    if !state.lock().unwrap().ended {
        return Err(CoreError::HandlerTimeout);
    }
    Ok(())
}

fn run_route_handler_body(
    requirer: &VfsRequire,
    dir: &str,
    code: &str,
    req: RequestContext,
    params: &Params,
    state: SharedResponse,
) -> Result<(), CoreError> {
    run_route_handler_body_with(requirer, dir, code, req, params, state, apply_response_like)
}

/// Streaming counterpart: identical dispatch, but a `Response` wrapping
/// a `ReadableStream` delivers its chunks through `onStart`/`onChunk`/
/// `onEnd` instead of a single buffered body.
fn run_route_handler_body_streaming(
    requirer: &VfsRequire,
    dir: &str,
    code: &str,
    req: RequestContext,
    params: &Params,
    state: SharedResponse,
) -> Result<(), CoreError> {
    run_route_handler_body_with(requirer, dir, code, req, params, state, apply_response_like_streaming)
}

fn run_route_handler_body_with(
    requirer: &VfsRequire,
    dir: &str,
    code: &str,
    req: RequestContext,
    params: &Params,
    state: SharedResponse,
    apply: fn(&mut Context, &boa_engine::object::JsObject, &SharedResponse) -> Result<(), CoreError>,
) -> Result<(), CoreError> {
    let mut context = Context::default();
    let env = HashMap::new();
    let module_value = install_module_scaffold(&mut context, requirer, dir, &env, code)?;

    let module_obj = module_value
        .as_object()
        .ok_or_else(|| CoreError::HandlerError("route module did not produce an object".to_string()))?;

    let method = req.method.to_uppercase();
    let mut handler = None;
    for key in module_obj.own_property_keys(&mut context).map_err(js_to_core_error)? {
        let name = key.to_string();
        if is_http_method_export(&name) && name.eq_ignore_ascii_case(&method) {
            let value = module_obj
                .get(boa_engine::js_string!(name.as_str()), &mut context)
                .map_err(js_to_core_error)?;
            if value.as_callable().is_some() {
                handler = Some(value);
                break;
            }
        }
    }
    let Some(handler) = handler else {
        return Err(CoreError::MethodNotAllowed);
    };
    let handler_fn = handler.as_callable().unwrap();

    let req_obj = build_request_object(&mut context, &req).map_err(js_to_core_error)?;
    let params_obj = build_params_object(&mut context, params);
    let params_promise = resolve_with_promise(&mut context, params_obj).map_err(js_to_core_error)?;
    let mut ctx_builder = boa_engine::object::ObjectInitializer::new(&mut context);
    ctx_builder.property(js_string!("params"), params_promise, Attribute::all());
    let second_arg = boa_engine::JsValue::from(ctx_builder.build());

    let result = handler_fn
        .call(&boa_engine::JsValue::undefined(), &[req_obj, second_arg], &mut context)
        .map_err(js_to_core_error)?;
    context.run_jobs();

    // An `async function POST() { ... }` handler's return value is
    // always wrapped in a native Promise by JS semantics — settle it
    // before inspecting `status`/`headers`/body, or every idiomatic
    // async handler falls through to the no-response timeout below.
    let result = resolve_possible_promise(&mut context, result)?;

    // A `route.ts` handler that returns a `Response`-shaped value
    // (has `status`/`headers`/a body getter) is read straight into
    // the buffered state rather than requiring `res.end()` — app
    // routes never receive a mock `res` at all.
    if let Some(obj) = result.as_object() {
        if obj.has_property(js_string!("status"), &mut context).unwrap_or(false) {
            apply(&mut context, obj, &state)?;
            return Ok(());
        }
    }

    if !state.lock().unwrap().ended {
        return Err(CoreError::HandlerTimeout);
    }
    Ok(())
}

/// Builds the `{ id: "...", slug: [...] }`-shaped params object from a
/// resolved route's dynamic segments (spec §4.6's second handler
/// argument), mirroring `value_bridge::json_to_js`'s array/object
/// construction but reading straight from [`Params`] instead of JSON.
fn build_params_object(context: &mut Context, params: &Params) -> boa_engine::JsValue {
    let mut fields = Vec::with_capacity(params.len());
    for (key, value) in params {
        let js_value = match value {
            almostnode_core::model::ParamValue::Single(s) => boa_engine::JsValue::from(js_string!(s.as_str())),
            almostnode_core::model::ParamValue::List(items) => {
                let values: Vec<boa_engine::JsValue> = items
                    .iter()
                    .map(|s| boa_engine::JsValue::from(js_string!(s.as_str())))
                    .collect();
                boa_engine::JsValue::from(boa_engine::object::builtins::JsArray::from_iter(values, context))
            }
        };
        fields.push((key.clone(), js_value));
    }
    let mut builder = boa_engine::object::ObjectInitializer::new(context);
    for (key, value) in fields {
        builder.property(js_string!(key.as_str()), value, Attribute::all());
    }
    boa_engine::JsValue::from(builder.build())
}

/// Wraps `value` in `Promise.resolve(value)` (spec §4.6: the second
/// handler argument is `{ params: Promise.resolve(routeParams) }`).
fn resolve_with_promise(
    context: &mut Context,
    value: boa_engine::JsValue,
) -> boa_engine::JsResult<boa_engine::JsValue> {
    let promise_ctor = context.global_object().get(js_string!("Promise"), context)?;
    let promise_obj = promise_ctor
        .as_object()
        .ok_or_else(|| js_error("global Promise is not an object"))?
        .clone();
    let resolve_fn = promise_obj.get(js_string!("resolve"), context)?;
    let resolve_fn = resolve_fn
        .as_callable()
        .ok_or_else(|| js_error("Promise.resolve is not callable"))?;
    resolve_fn.call(&boa_engine::JsValue::from(promise_obj), &[value], context)
}

fn js_error(message: &str) -> boa_engine::JsError {
    boa_engine::JsError::from_opaque(boa_engine::JsValue::from(js_string!(message)))
}

/// Settles `value` if it's thenable (an `async function`'s return value
/// always is) via the `__settlePromise` helper evaluated alongside
/// [`RESPONSE_STREAM_PRELUDE`], draining microtasks so the result is
/// available synchronously afterwards. Non-thenable values pass through
/// unchanged. A promise that never settles (nothing in this environment
/// resolves it) surfaces as the same [`CoreError::HandlerTimeout`] a
/// handler that never calls `res.end()` produces.
fn resolve_possible_promise(
    context: &mut Context,
    value: boa_engine::JsValue,
) -> Result<boa_engine::JsValue, CoreError> {
    let is_thenable = value
        .as_object()
        .map(|obj| {
            obj.get(js_string!("then"), context)
                .map(|v| v.as_callable().is_some())
                .unwrap_or(false)
        })
        .unwrap_or(false);
    if !is_thenable {
        return Ok(value);
    }

    let settle_fn = context
        .global_object()
        .get(js_string!("__settlePromise"), context)
        .map_err(js_to_core_error)?;
    let settle_fn = settle_fn
        .as_callable()
        .ok_or_else(|| CoreError::HandlerError("missing promise-settling helper".to_string()))?;

    let holder = {
        let mut builder = boa_engine::object::ObjectInitializer::new(context);
        builder.property(js_string!("settled"), boa_engine::JsValue::from(false), Attribute::all());
        builder.property(js_string!("rejected"), boa_engine::JsValue::from(false), Attribute::all());
        builder.property(js_string!("value"), boa_engine::JsValue::undefined(), Attribute::all());
        builder.build()
    };

    settle_fn
        .call(
            &boa_engine::JsValue::undefined(),
            &[value, boa_engine::JsValue::from(holder.clone())],
            context,
        )
        .map_err(js_to_core_error)?;
    context.run_jobs();

    let settled = holder
        .get(js_string!("settled"), context)
        .map(|v| v.as_boolean().unwrap_or(false))
        .unwrap_or(false);
    if !settled {
        return Err(CoreError::HandlerTimeout);
    }

    let rejected = holder
        .get(js_string!("rejected"), context)
        .map(|v| v.as_boolean().unwrap_or(false))
        .unwrap_or(false);
    let settled_value = holder.get(js_string!("value"), context).map_err(js_to_core_error)?;
    if rejected {
        let message = settled_value
            .as_object()
            .and_then(|o| o.get(js_string!("message"), context).ok())
            .and_then(|v| v.as_string())
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|| "handler rejected".to_string());
        return Err(CoreError::HandlerError(message));
    }
    Ok(settled_value)
}

/// Flattens a returned `Response`'s body into the bytes the wire
/// response carries. `_body` (the plain-object shape tests and simple
/// handlers use) wins if present; otherwise `_bodyInit` is read, which
/// is either a plain string or a [`RESPONSE_STREAM_PRELUDE`]
/// `ReadableStream` instance whose `__chunks` each hold either a string
/// or a `TextEncoder`-produced byte array.
fn response_body_chunks(context: &mut Context, obj: &boa_engine::object::JsObject) -> Vec<Vec<u8>> {
    if let Ok(body) = obj.get(js_string!("_body"), context) {
        if let Some(s) = body.as_string() {
            return vec![s.to_std_string_escaped().into_bytes()];
        }
    }

    let Ok(body_init) = obj.get(js_string!("_bodyInit"), context) else {
        return Vec::new();
    };
    if let Some(s) = body_init.as_string() {
        return vec![s.to_std_string_escaped().into_bytes()];
    }
    let Some(stream_obj) = body_init.as_object() else {
        return Vec::new();
    };
    let Ok(chunks_value) = stream_obj.get(js_string!("__chunks"), context) else {
        return Vec::new();
    };
    let Some(chunks_obj) = chunks_value.as_object() else {
        return Vec::new();
    };
    let Ok(length) = chunks_obj
        .get(js_string!("length"), context)
        .map(|v| v.as_number().unwrap_or(0.0) as usize)
    else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(length);
    for i in 0..length {
        let Ok(entry) = chunks_obj.get(i as u32, context) else { continue };
        if let Some(s) = entry.as_string() {
            out.push(s.to_std_string_escaped().into_bytes());
            continue;
        }
        if let Some(entry_obj) = entry.as_object() {
            if let Ok(entry_len) = entry_obj
                .get(js_string!("length"), context)
                .map(|v| v.as_number().unwrap_or(0.0) as usize)
            {
                let mut bytes = Vec::with_capacity(entry_len);
                for j in 0..entry_len {
                    if let Ok(n) = entry_obj.get(j as u32, context) {
                        bytes.push(n.as_number().unwrap_or(0.0) as u8);
                    }
                }
                out.push(bytes);
            }
        }
    }
    out
}

fn response_headers(context: &mut Context, obj: &boa_engine::object::JsObject) -> indexmap::IndexMap<String, String> {
    let mut headers = indexmap::IndexMap::new();
    if let Ok(headers_value) = obj.get(js_string!("headers"), context) {
        if let Some(headers_obj) = headers_value.as_object() {
            if let Ok(keys) = headers_obj.own_property_keys(context) {
                for key in keys {
                    let name = key.to_string();
                    if let Ok(value) = headers_obj.get(js_string!(name.as_str()), context) {
                        if let Some(s) = value.as_string() {
                            headers.insert(name, s.to_std_string_escaped());
                        }
                    }
                }
            }
        }
    }
    headers
}

fn apply_response_like(
    context: &mut Context,
    obj: &boa_engine::object::JsObject,
    state: &SharedResponse,
) -> Result<(), CoreError> {
    let status = obj
        .get(js_string!("status"), context)
        .ok()
        .and_then(|v| v.as_number())
        .unwrap_or(200.0) as u16;
    let headers = response_headers(context, obj);
    let chunks = response_body_chunks(context, obj);

    let mut guard = state.lock().unwrap();
    guard.status_code = status;
    guard.status_message = String::new();
    guard.headers = headers;
    guard.body = chunks.concat();
    guard.ended = true;
    guard.headers_sent = true;
    if let Some(on_start) = &guard.on_start {
        on_start(guard.status_code, &guard.status_message, &guard.headers);
    }
    drop(guard);
    Ok(())
}

/// Streaming counterpart of [`apply_response_like`]: each chunk crosses
/// `onChunk` individually instead of being concatenated into one body,
/// so a handler's `controller.enqueue` calls are observable as
/// separate writes the way spec §4.6's streaming scenario expects.
fn apply_response_like_streaming(
    context: &mut Context,
    obj: &boa_engine::object::JsObject,
    state: &SharedResponse,
) -> Result<(), CoreError> {
    let status = obj
        .get(js_string!("status"), context)
        .ok()
        .and_then(|v| v.as_number())
        .unwrap_or(200.0) as u16;
    let headers = response_headers(context, obj);
    let chunks = response_body_chunks(context, obj);

    let mut guard = state.lock().unwrap();
    guard.status_code = status;
    guard.status_message = String::new();
    guard.headers = headers;
    if let Some(on_start) = &guard.on_start {
        on_start(guard.status_code, &guard.status_message, &guard.headers);
    }
    guard.headers_sent = true;
    for chunk in &chunks {
        if let Some(on_chunk) = &guard.on_chunk {
            on_chunk(chunk);
        } else {
            guard.body.extend_from_slice(chunk);
        }
    }
    guard.ended = true;
    if let Some(on_end) = &guard.on_end {
        on_end();
    }
    drop(guard);
    Ok(())
}

/// Installs `module`/`exports`/`require`/`process.env` and evaluates
/// `code`, returning the final `module.exports` as a live `JsValue` in
/// `context` (not bridged to JSON here — the handler path needs the
/// live callable, unlike the plain `require()` module-cache path in
/// `almostnode-require`).
fn install_module_scaffold(
    context: &mut Context,
    requirer: &VfsRequire,
    dir: &str,
    env: &HashMap<String, String>,
    code: &str,
) -> Result<boa_engine::JsValue, CoreError> {
    let exports_obj = boa_engine::object::JsObject::with_object_proto(context.intrinsics());
    let module_value = {
        let mut builder = boa_engine::object::ObjectInitializer::new(context);
        builder.property(js_string!("exports"), boa_engine::JsValue::from(exports_obj.clone()), Attribute::all());
        boa_engine::JsValue::from(builder.build())
    };
    context
        .register_global_property(js_string!("module"), module_value.clone(), Attribute::all())
        .map_err(js_to_core_error)?;
    context
        .register_global_property(js_string!("exports"), boa_engine::JsValue::from(exports_obj), Attribute::all())
        .map_err(js_to_core_error)?;

    let process_obj = {
        let mut env_builder = boa_engine::object::ObjectInitializer::new(context);
        for (k, v) in env {
            env_builder.property(js_string!(k.as_str()), js_string!(v.as_str()), Attribute::all());
        }
        let env_value = boa_engine::JsValue::from(env_builder.build());
        let mut process_builder = boa_engine::object::ObjectInitializer::new(context);
        process_builder.property(js_string!("env"), env_value, Attribute::all());
        boa_engine::JsValue::from(process_builder.build())
    };
    context
        .register_global_property(js_string!("process"), process_obj, Attribute::all())
        .map_err(js_to_core_error)?;

    almostnode_require::register_require_function_live(context, requirer.clone(), dir.to_string())
        .map_err(js_to_core_error)?;

    context
        .eval(Source::from_bytes(RESPONSE_STREAM_PRELUDE))
        .map_err(js_to_core_error)?;

    context
        .eval(Source::from_bytes(code))
        .map_err(|e| CoreError::HandlerError(format!("{e} (in {dir})")))?;

    let module = context
        .global_object()
        .get(js_string!("module"), context)
        .map_err(js_to_core_error)?;
    module
        .as_object()
        .ok_or_else(|| CoreError::HandlerError("module binding corrupted".to_string()))?
        .get(js_string!("exports"), context)
        .map_err(js_to_core_error)
}

/// `module.exports.default ?? module.exports`, unwrapping one further
/// `.default` per spec §4.6.
fn resolve_default_export(
    context: &mut Context,
    exports: &boa_engine::JsValue,
) -> Result<boa_engine::JsValue, CoreError> {
    let Some(obj) = exports.as_object() else {
        return Ok(exports.clone());
    };
    let default = obj
        .get(js_string!("default"), context)
        .map_err(js_to_core_error)?;
    let mut resolved = if default.is_undefined() { exports.clone() } else { default };
    if let Some(inner) = resolved.as_object() {
        if let Ok(nested) = inner.get(js_string!("default"), context) {
            if !nested.is_undefined() && nested.as_callable().is_some() {
                resolved = nested;
            }
        }
    }
    Ok(resolved)
}

fn js_to_core_error(err: boa_engine::JsError) -> CoreError {
    CoreError::HandlerError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;

    fn executor(vfs: InMemoryVfs) -> HandlerExecutor {
        HandlerExecutor::new(Arc::new(vfs), HashMap::new(), None, Vec::new())
    }

    #[tokio::test]
    async fn classic_handler_json_response_round_trips() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/pages/api/hello.js",
            "export default function handler(req, res) { res.status(200).json({ hello: req.query.name || 'world' }); }",
        );
        let exec = executor(vfs);
        let mut req = RequestContext::default();
        req.method = "GET".to_string();
        req.url = "/api/hello?name=next".to_string();
        req.query = RequestContext::parse_query(&req.url);

        let outcome = exec.run_api_handler("/pages/api/hello.js", req).await.unwrap();
        let HandlerOutcome::Buffered(response) = outcome else {
            panic!("expected buffered outcome");
        };
        assert_eq!(response.status_code, 200);
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            r#"{"hello":"next"}"#
        );
    }

    #[tokio::test]
    async fn classic_handler_errors_surface_as_handler_error() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/pages/api/broken.js",
            "export default function handler(req, res) { throw new Error('boom'); }",
        );
        let exec = executor(vfs);
        let err = exec
            .run_api_handler("/pages/api/broken.js", RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::HandlerError(_)));
    }

    #[tokio::test]
    async fn app_route_dispatches_matching_method_export() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/app/chat/route.ts",
            "export async function POST() { return { status: 201, headers: {}, _body: 'created' }; }",
        );
        let exec = executor(vfs);
        let mut req = RequestContext::default();
        req.method = "POST".to_string();
        let outcome = exec
            .run_app_route_handler("/app/chat/route.ts", req, Params::default())
            .await
            .unwrap();
        let HandlerOutcome::Buffered(response) = outcome else {
            panic!("expected buffered outcome");
        };
        assert_eq!(response.status_code, 201);
        assert_eq!(String::from_utf8(response.body).unwrap(), "created");
    }

    #[tokio::test]
    async fn app_route_method_not_allowed_when_no_matching_export() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/app/chat/route.ts", "export async function POST() { return {}; }");
        let exec = executor(vfs);
        let mut req = RequestContext::default();
        req.method = "DELETE".to_string();
        let err = exec
            .run_app_route_handler("/app/chat/route.ts", req, Params::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MethodNotAllowed));
    }
}
