//! bili-harvest runtime: HTTP transport, page renderers, config loading and
//! JSON-lines export around the `bili-engagement` core.

pub mod cli;
pub mod config;
pub mod export;
pub mod http_client;
pub mod renderer;
