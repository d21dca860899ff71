pub mod access;
pub mod duration;
pub mod merge;
pub mod models;
