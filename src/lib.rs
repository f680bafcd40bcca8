pub mod config;
pub mod error;
pub mod form;
pub mod logging;
pub mod namespace;
pub mod record;
pub mod refid;
pub mod router;
pub mod schema;
pub mod server;
pub mod storage;
