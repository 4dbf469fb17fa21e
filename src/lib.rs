pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reminder;
pub mod sql;
pub mod time;
pub mod tls;
pub mod wal;
pub mod wire;
