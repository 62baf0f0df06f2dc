//! API handler execution (spec §4.6): classic Pages API req/res
//! handlers, streaming, and App Router `route.ts` Web-Request/Response
//! handlers, all built on the `boa_engine` context `almostnode-require`
//! already uses for module execution.

pub mod builtins;
pub mod executor;
pub mod mock;

pub use builtins::NodeBuiltins;
pub use executor::{HandlerExecutor, HandlerOutcome};
