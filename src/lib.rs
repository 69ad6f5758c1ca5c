pub mod cli;
pub mod client;
pub mod config;
pub mod pipeline;
pub mod source;
pub mod storage;
