pub mod auth;
pub mod bootstrap;
pub mod commands;
pub mod dashboard;
pub mod poller;
pub mod record_sync;
pub mod webhook_dispatch;
