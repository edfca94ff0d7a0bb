//! The `dispatcher` module turns one delivered message into a set of
//! concurrent downloads and waits for all of them before returning.

pub mod fanout;

pub use fanout::{DispatchReport, Dispatcher, NotificationHandler};
