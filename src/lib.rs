pub mod app;
pub mod config;
pub mod derive;
pub mod domain;
pub mod download;
pub mod error;
pub mod extent;
pub mod fallback;
pub mod filter;
pub mod fs_util;
pub mod geocode;
pub mod http;
pub mod listing;
pub mod metadata;
pub mod output;
pub mod providers;
pub mod resolver;
pub mod select;
