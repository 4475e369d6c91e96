//! Core types shared by the limiter, transports, executor and callers.

pub mod clock;
pub mod context;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::{FetchContext, Interrupted};
pub use error::{AttemptFailure, ErrorKind, FetchError, FetchResult};
pub use types::{FetchRequest, FetchResponse, Fetched};
