//! The `fetcher` module downloads a single link over HTTP(S).
//!
//! The body is streamed into a temporary file next to the final name and
//! renamed into place only once it is complete, so readers of the download
//! directory never observe a half-written file. A failed fetch leaves the
//! directory untouched.

pub mod http;
pub mod target;

pub use http::{Fetch, FileFetcher};
pub use target::DownloadTarget;
