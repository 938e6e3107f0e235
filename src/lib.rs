pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod http;
pub mod limits;
pub mod mail;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod token;
pub mod wal;
