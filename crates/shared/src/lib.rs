pub mod catalog;
pub mod config;
mod config_env;
pub mod conversation;
pub mod directory;
pub mod dispatcher;
pub mod inbound;
pub mod kv;
pub mod locks;
pub mod messaging;
pub mod models;
pub mod redact;
pub mod relay;
pub mod repos;
pub mod session;
