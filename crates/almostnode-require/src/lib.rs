//! The VFS-backed CommonJS module loader (spec §4.5): `createVfsRequire`
//! becomes [`VfsRequire::new`]; `require(id)` resolves via
//! `almostnode_core::resolve` and executes the target module body in
//! its own `boa_engine::Context` (the embedded JS engine playing the
//! role the spec assigns to `new Function(...)` under a host Node.js
//! process this workspace doesn't have).
//!
//! Every module body runs in a throwaway `Context`; its finished
//! `module.exports` crosses back out as `serde_json::Value` (see
//! [`value_bridge`]), which is also the type the shared
//! [`almostnode_core::model::ModuleCache`] stores — so a module three
//! levels deep in a require chain never needs a second module's
//! `JsValue`s to stay alive past that module's own execution. Builtins
//! are the one exception: they're built directly against the calling
//! module's live `Context` so they can expose real host functions
//! (`fs.readFileSync` bound to the VFS, say) rather than being limited
//! to JSON-serializable data.

mod value_bridge;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::object::{FunctionObjectBuilder, JsObject, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsError, JsValue, NativeFunction, Source};

use almostnode_core::model::ModuleCache;
use almostnode_core::resolve::{resolve_module, Resolution};
use almostnode_transforms::esm_to_cjs::{looks_like_esm, transform_esm_to_cjs_simple};
use almostnode_vfs::Vfs;

/// Builds a builtin module's exports directly against the `Context`
/// that will use them, so builtins like `fs` can expose real
/// `NativeFunction`s bound to the VFS instead of being limited to
/// static JSON data. `almostnode-handlers` implements this for the
/// node-shim table (`fs`, `path`, `http`, …); [`JsonBuiltins`] covers
/// the common case of a builtin that really is just constants.
pub trait BuiltinProvider: Send + Sync {
    fn names(&self) -> Vec<String>;
    fn build(&self, name: &str, context: &mut Context) -> boa_engine::JsResult<Option<JsValue>>;
}

pub struct JsonBuiltins(pub std::collections::HashMap<String, serde_json::Value>);

impl BuiltinProvider for JsonBuiltins {
    fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    fn build(&self, name: &str, context: &mut Context) -> boa_engine::JsResult<Option<JsValue>> {
        match self.0.get(name) {
            Some(value) => value_bridge::json_to_js(context, value).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct VfsRequire {
    vfs: Arc<dyn Vfs>,
    cache: Arc<ModuleCache>,
    builtins: Arc<dyn BuiltinProvider>,
}

fn strip_shebang(source: &str) -> &str {
    if let Some(rest) = source.strip_prefix("#!") {
        match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        source
    }
}

fn to_anyhow(err: JsError) -> anyhow::Error {
    anyhow::anyhow!("{err}")
}

impl VfsRequire {
    pub fn new(vfs: Arc<dyn Vfs>, cache: Arc<ModuleCache>, builtins: Arc<dyn BuiltinProvider>) -> Self {
        VfsRequire { vfs, cache, builtins }
    }

    /// `require(id)` called from Rust (not from inside an executing
    /// module body) — used by `almostnode-handlers` to load the entry
    /// handler module. Builtins have no live `Context` to build
    /// against at this call site, so this path only resolves files;
    /// builtin resolution happens in-context via [`Self::require_in_context`].
    pub fn require(&self, from_dir: &str, id: &str) -> anyhow::Result<serde_json::Value> {
        match resolve_module(self.vfs.as_ref(), from_dir, id, &[]) {
            Some(Resolution::File(path)) => self.load_module(&path),
            Some(Resolution::Builtin(name)) => {
                anyhow::bail!("builtin module '{name}' requires a live JS context to resolve")
            }
            None => anyhow::bail!("Cannot find module '{id}' (in {from_dir})"),
        }
    }

    /// The version `require()` inside an executing module body actually
    /// calls: resolves builtins directly against `context` (so they can
    /// carry real host functions), and files through [`Self::load_module`].
    fn require_in_context(&self, context: &mut Context, from_dir: &str, id: &str) -> anyhow::Result<JsValue> {
        let builtin_names = self.builtins.names();
        let name_refs: Vec<&str> = builtin_names.iter().map(|s| s.as_str()).collect();
        match resolve_module(self.vfs.as_ref(), from_dir, id, &name_refs) {
            Some(Resolution::Builtin(name)) => self
                .builtins
                .build(&name, context)
                .map_err(to_anyhow)?
                .ok_or_else(|| anyhow::anyhow!("builtin module '{name}' has no implementation")),
            Some(Resolution::File(path)) => {
                let exports = self.load_module(&path)?;
                value_bridge::json_to_js(context, &exports).map_err(to_anyhow)
            }
            None => anyhow::bail!("Cannot find module '{id}' (in {from_dir})"),
        }
    }

    /// `loadModule` (spec §4.5): cache-before-execute circular safety,
    /// `.json` short-circuit, ESM-detection fallback, execution, and
    /// cache eviction on failure.
    pub fn load_module(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        if let Some(entry) = self.cache.get(path) {
            let guard = entry.lock().unwrap();
            return Ok(guard.exports.clone());
        }

        let handle = self.cache.insert_stub(path.to_string());

        match self.execute_module(path) {
            Ok(exports) => {
                let mut guard = handle.lock().unwrap();
                guard.exports = exports.clone();
                guard.loaded = true;
                Ok(exports)
            }
            Err(err) => {
                self.cache.remove(path);
                let message = err.to_string();
                if message.contains(&format!("(in {path})")) {
                    Err(err)
                } else {
                    anyhow::bail!("{message} (in {path})")
                }
            }
        }
    }

    fn execute_module(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        if path.ends_with(".json") {
            let raw = self.vfs.read_file_utf8(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            return Ok(value);
        }

        let raw = self.vfs.read_file_utf8(path)?;
        let stripped = strip_shebang(&raw);
        let is_cjs_extension = path.ends_with(".cjs");
        let body = if !is_cjs_extension && looks_like_esm(stripped) {
            transform_esm_to_cjs_simple(stripped)
        } else {
            stripped.to_string()
        };

        let dir = almostnode_vfs::dirname(path);

        let mut context = Context::default();

        // `module.exports` starts as a plain object; the module body
        // may reassign it entirely (`module.exports = X`), which this
        // call site reads back out after evaluation finishes.
        let exports_obj = boa_engine::object::JsObject::with_object_proto(context.intrinsics());
        let module_value = {
            let mut builder = ObjectInitializer::new(&mut context);
            builder.property(js_string!("exports"), JsValue::from(exports_obj.clone()), Attribute::all());
            JsValue::from(builder.build())
        };

        context
            .register_global_property(js_string!("module"), module_value, Attribute::all())
            .map_err(to_anyhow)?;
        context
            .register_global_property(js_string!("exports"), JsValue::from(exports_obj), Attribute::all())
            .map_err(to_anyhow)?;
        context
            .register_global_property(js_string!("__filename"), JsValue::from(js_string!(path)), Attribute::all())
            .map_err(to_anyhow)?;
        context
            .register_global_property(
                js_string!("__dirname"),
                JsValue::from(js_string!(dir.as_str())),
                Attribute::all(),
            )
            .map_err(to_anyhow)?;

        register_require_function(&mut context, self.clone(), dir).map_err(to_anyhow)?;

        context
            .eval(Source::from_bytes(&body))
            .map_err(|e| anyhow::anyhow!("{e} (in {path})"))?;

        let final_module = context
            .global_object()
            .get(js_string!("module"), &mut context)
            .map_err(to_anyhow)?;
        let exports = final_module
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("module binding corrupted (in {path})"))?
            .get(js_string!("exports"), &mut context)
            .map_err(to_anyhow)?;

        value_bridge::js_to_json(&mut context, &exports).map_err(to_anyhow)
    }
}

/// Binds `require` as a native function on `context` that recurses
/// into `requirer.require_in_context(...)` synchronously — a nested
/// file dependency executes in its *own* fresh `Context`, so this
/// closure never needs to hold two `Context`s' values alive at once;
/// only builtins are built directly against the caller's `context`.
pub fn register_require_function(
    context: &mut Context,
    requirer: VfsRequire,
    from_dir: String,
) -> boa_engine::JsResult<()> {
    let require_fn = boa_engine::NativeFunction::from_closure(move |_this, args, context| {
        let id = args
            .first()
            .and_then(|v| v.as_string())
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default();
        requirer
            .require_in_context(context, &from_dir, &id)
            .map_err(|err| JsError::from_opaque(JsValue::from(js_string!(err.to_string().as_str()))))
    });

    context.register_global_callable(js_string!("require"), 1, require_fn)
}

/// Per-invocation cache for [`register_require_function_live`]: keyed by
/// resolved VFS path, holding the live `JsValue` exports rather than
/// `serde_json::Value`. Scoped to one `Context` (never crosses a thread
/// or outlives the handler call that created it), so a function-valued
/// export survives the require boundary instead of being flattened to
/// JSON and losing its body.
type LiveModuleCache = Rc<RefCell<HashMap<String, JsValue>>>;

/// Binds `require` on `context` the way [`register_require_function`]
/// does, except every required file executes inside this *same*
/// `context` (wrapped in an IIFE scoping `module`/`exports`/`require`/
/// `__filename`/`__dirname` to that call instead of clobbering the
/// caller's own globals) rather than a disposable sub-`Context`. A
/// module's exports therefore stay a live `JsValue` all the way back to
/// the caller — including a callable — instead of round-tripping
/// through `serde_json::Value`, which can't carry a function.
///
/// Used for the handler entry module and everything it (transitively)
/// requires; the plain Rust-side [`VfsRequire::require`] and its
/// in-context sibling remain JSON-based for callers with no live
/// `Context` of their own to share.
pub fn register_require_function_live(
    context: &mut Context,
    requirer: VfsRequire,
    from_dir: String,
) -> boa_engine::JsResult<()> {
    let live_cache: LiveModuleCache = Rc::new(RefCell::new(HashMap::new()));
    let require_value = build_require_function_live(context, requirer, live_cache, from_dir);
    context.register_global_property(js_string!("require"), require_value, Attribute::all())
}

fn build_require_function_live(
    context: &mut Context,
    requirer: VfsRequire,
    live_cache: LiveModuleCache,
    from_dir: String,
) -> JsValue {
    let native = NativeFunction::from_closure(move |_this, args, context| {
        let id = args
            .first()
            .and_then(|v| v.as_string())
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default();
        require_live(context, &requirer, &live_cache, &from_dir, &id)
            .map_err(|err| JsError::from_opaque(JsValue::from(js_string!(err.to_string().as_str()))))
    });
    JsValue::from(
        FunctionObjectBuilder::new(context.realm().clone(), native)
            .name(js_string!("require"))
            .length(1)
            .build(),
    )
}

/// `require(id)` called from inside a module body executing through
/// [`register_require_function_live`]: resolves builtins directly
/// against `context` (same as the JSON-based path), and resolves files
/// by executing them in this same `context`, consulting/populating
/// `live_cache` for circular-safety and re-require identity.
fn require_live(
    context: &mut Context,
    requirer: &VfsRequire,
    live_cache: &LiveModuleCache,
    from_dir: &str,
    id: &str,
) -> anyhow::Result<JsValue> {
    let builtin_names = requirer.builtins.names();
    let name_refs: Vec<&str> = builtin_names.iter().map(|s| s.as_str()).collect();
    match resolve_module(requirer.vfs.as_ref(), from_dir, id, &name_refs) {
        Some(Resolution::Builtin(name)) => requirer
            .builtins
            .build(&name, context)
            .map_err(to_anyhow)?
            .ok_or_else(|| anyhow::anyhow!("builtin module '{name}' has no implementation")),
        Some(Resolution::File(path)) => {
            if let Some(cached) = live_cache.borrow().get(&path) {
                return Ok(cached.clone());
            }
            load_module_live(context, requirer, live_cache, &path)
        }
        None => anyhow::bail!("Cannot find module '{id}' (in {from_dir})"),
    }
}

fn load_module_live(
    context: &mut Context,
    requirer: &VfsRequire,
    live_cache: &LiveModuleCache,
    path: &str,
) -> anyhow::Result<JsValue> {
    if path.ends_with(".json") {
        let raw = requirer.vfs.read_file_utf8(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let js = value_bridge::json_to_js(context, &value).map_err(to_anyhow)?;
        live_cache.borrow_mut().insert(path.to_string(), js.clone());
        return Ok(js);
    }

    let raw = requirer.vfs.read_file_utf8(path)?;
    let stripped = strip_shebang(&raw);
    let is_cjs_extension = path.ends_with(".cjs");
    let body = if !is_cjs_extension && looks_like_esm(stripped) {
        transform_esm_to_cjs_simple(stripped)
    } else {
        stripped.to_string()
    };

    let dir = almostnode_vfs::dirname(path);

    // Pre-insert a stub `exports` object before evaluating, so a
    // circular `require()` of this same path sees (and can mutate) the
    // module object that's still being filled in, the same
    // circular-dependency contract `VfsRequire::load_module` honours.
    let exports_obj = JsObject::with_object_proto(context.intrinsics());
    let module_value = {
        let mut builder = ObjectInitializer::new(context);
        builder.property(js_string!("exports"), JsValue::from(exports_obj.clone()), Attribute::all());
        JsValue::from(builder.build())
    };
    live_cache.borrow_mut().insert(path.to_string(), JsValue::from(exports_obj.clone()));

    let wrapped = format!("(function(module, exports, require, __filename, __dirname) {{\n{body}\n}})");
    let factory = context
        .eval(Source::from_bytes(wrapped.as_bytes()))
        .map_err(|e| anyhow::anyhow!("{e} (in {path})"))?;
    let factory_fn = factory
        .as_callable()
        .ok_or_else(|| anyhow::anyhow!("module wrapper did not evaluate to a function (in {path})"))?;

    let require_value = build_require_function_live(context, requirer.clone(), live_cache.clone(), dir.clone());
    let filename_value = JsValue::from(js_string!(path));
    let dirname_value = JsValue::from(js_string!(dir.as_str()));

    let call_result = factory_fn.call(
        &JsValue::undefined(),
        &[module_value.clone(), JsValue::from(exports_obj), require_value, filename_value, dirname_value],
        context,
    );
    if let Err(err) = call_result {
        live_cache.borrow_mut().remove(path);
        let message = err.to_string();
        return if message.contains(&format!("(in {path})")) {
            anyhow::bail!("{message}")
        } else {
            anyhow::bail!("{message} (in {path})")
        };
    }

    let final_exports = module_value
        .as_object()
        .expect("module_value is always an object")
        .get(js_string!("exports"), context)
        .map_err(to_anyhow)?;
    live_cache.borrow_mut().insert(path.to_string(), final_exports.clone());
    Ok(final_exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_vfs::InMemoryVfs;
    use std::collections::HashMap;

    fn new_require(vfs: InMemoryVfs) -> VfsRequire {
        VfsRequire::new(
            Arc::new(vfs),
            Arc::new(ModuleCache::with_capacity(100)),
            Arc::new(JsonBuiltins(HashMap::new())),
        )
    }

    #[test]
    fn loads_json_module_directly() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/data.json", r#"{"a": 1}"#);
        let requirer = new_require(vfs);
        let exports = requirer.require("/", "./data.json").unwrap();
        assert_eq!(exports, serde_json::json!({"a": 1}));
    }

    #[test]
    fn loads_commonjs_module_honouring_exports_reassignment() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/lib/mod.js", "module.exports = { value: 42 };");
        let requirer = new_require(vfs);
        let exports = requirer.require("/lib", "./mod.js").unwrap();
        assert_eq!(exports, serde_json::json!({"value": 42}));
    }

    #[test]
    fn nested_require_resolves_builtin_in_context() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file(
            "/node_modules/shadow/index.js",
            "module.exports = { real: true };",
        );
        vfs.seed_file(
            "/lib/uses-path.js",
            "const path = require('path'); module.exports = { sep: path.sep };",
        );
        let mut builtins = HashMap::new();
        builtins.insert("path".to_string(), serde_json::json!({ "sep": "/" }));
        let requirer = VfsRequire::new(
            Arc::new(vfs),
            Arc::new(ModuleCache::with_capacity(100)),
            Arc::new(JsonBuiltins(builtins)),
        );
        let exports = requirer.require("/lib", "./uses-path.js").unwrap();
        assert_eq!(exports, serde_json::json!({ "sep": "/" }));
    }

    #[test]
    fn esm_style_module_is_transformed_before_execution() {
        let vfs = InMemoryVfs::new();
        vfs.seed_file("/lib/esm.js", "export default { greeting: 'hi' };");
        let requirer = new_require(vfs);
        let exports = requirer.require("/lib", "./esm.js").unwrap();
        assert_eq!(exports, serde_json::json!({ "greeting": "hi" }));
    }

    #[test]
    fn missing_module_errors_with_in_path_suffix() {
        let vfs = InMemoryVfs::new();
        let requirer = new_require(vfs);
        let err = requirer.require("/", "./nope.js").unwrap_err();
        assert!(err.to_string().contains("Cannot find module"));
    }
}
