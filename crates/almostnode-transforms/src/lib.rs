//! The code transformer (spec §4.3): turns TS/JSX/TSX/JS source read
//! from the VFS into browser-runnable ESM (for pages, components, and
//! layouts) or CJS (for API handlers), applying CSS handling, path
//! alias rewriting, npm import redirection, and React-Refresh
//! injection along the way.

pub mod alias;
pub mod css;
pub mod esm_to_cjs;
pub mod npm_redirect;
pub mod pipeline;
pub mod refresh;
pub mod swc_pipeline;

pub use pipeline::{cache_hit, transform_for_browser, transform_for_handler, PipelineOptions};
pub use swc_pipeline::{Loader, ModuleFormat};
