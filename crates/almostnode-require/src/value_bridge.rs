//! Converts between `serde_json::Value` (the interchange format the
//! module cache stores exports as — see `almostnode_core::model::VfsModuleEntry`)
//! and `boa_engine::JsValue` (the live value a module body actually
//! manipulates while it executes). Used by the plain `require()`
//! entry point (each module executes in its own disposable `Context`,
//! so JSON is the hand-off format between one module's finished
//! `module.exports` and the next module's live `require()` result) and
//! by builtins, which are always JSON-backed data. The live, same-
//! `Context` require path (`register_require_function_live`) bypasses
//! this bridge entirely so a function-valued export survives intact.

use boa_engine::object::ObjectInitializer;
use boa_engine::{Context, JsResult, JsValue};

pub fn json_to_js(context: &mut Context, value: &serde_json::Value) -> JsResult<JsValue> {
    Ok(match value {
        serde_json::Value::Null => JsValue::null(),
        serde_json::Value::Bool(b) => JsValue::from(*b),
        serde_json::Value::Number(n) => {
            JsValue::from(n.as_f64().unwrap_or(f64::NAN))
        }
        serde_json::Value::String(s) => JsValue::from(boa_engine::js_string!(s.as_str())),
        serde_json::Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(json_to_js(context, item)?);
            }
            JsValue::from(boa_engine::object::builtins::JsArray::from_iter(values, context))
        }
        serde_json::Value::Object(map) => {
            // Convert every field before the builder takes `context`
            // mutably, so nested arrays/objects recurse through
            // `json_to_js` instead of being flattened to strings.
            let mut fields = Vec::with_capacity(map.len());
            for (key, val) in map {
                fields.push((key.clone(), json_to_js(context, val)?));
            }
            let mut builder = ObjectInitializer::new(context);
            for (key, js_val) in fields {
                builder.property(boa_engine::js_string!(key.as_str()), js_val, boa_engine::property::Attribute::all());
            }
            JsValue::from(builder.build())
        }
    })
}

/// Converts a live `JsValue` (typically a module's final
/// `module.exports`) into `serde_json::Value` for cache storage,
/// using boa's own JSON serializer.
pub fn js_to_json(context: &mut Context, value: &JsValue) -> JsResult<serde_json::Value> {
    value.to_json(context)
}
