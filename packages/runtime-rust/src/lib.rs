//! Deputizer Runtime — tokio-backed executors, awaitable fetches, and
//! tracing setup on top of `deputizer-core`.

pub mod executor;
pub mod fetch;
pub mod telemetry;

pub use executor::{AsyncDefine, FutureExecutor, RunResult};
pub use fetch::{fetch, fetch_timeout, FetchError};
pub use telemetry::{init_json_tracing, init_tracing};

