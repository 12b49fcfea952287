pub mod archive;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod delimited;
pub mod detail;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod tui;
