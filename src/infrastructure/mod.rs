pub mod config;
pub mod error;
pub mod local_cache;
pub mod remote_store;
pub mod session_store;
pub mod storage;
pub mod webhook;
