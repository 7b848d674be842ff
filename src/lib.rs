pub mod api;
pub mod config;
pub mod formats;
pub mod gateway;
pub mod handlers;
pub mod humanize;
pub mod observability;
pub mod storage;
