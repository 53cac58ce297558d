pub mod app;
pub mod cache_key;
pub mod config;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod geoglows;
pub mod http;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod retro;
pub mod series;
pub mod state;
pub mod store;
pub mod zarr;
