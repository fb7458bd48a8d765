pub mod config;
pub mod pipeline;
pub mod recommend;
pub mod retry;
pub mod server;
pub mod sources;
pub mod store;
