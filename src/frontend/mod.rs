//! Protocol frontends (§4.F): the transport-specific framing layered on
//! top of [`crate::methods::MethodRouter`]. A process runs exactly one of
//! these, selected by `--transport`/`transport:` config (see DESIGN.md's
//! "stdio vs HTTP frontend concurrency" decision) — `main.rs` only ever
//! composes one frontend per process, never two listener loops side by
//! side.

pub mod http;
pub mod stdio;

pub use http::AppState;
pub use stdio::StdioFrontend;
