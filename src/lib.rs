#![allow(async_fn_in_trait)]
pub mod auth;
pub mod catalog;
pub mod config;
pub mod copernicus;
pub mod error;
pub mod http;
pub mod path;
pub mod pipeline;
pub mod query;
pub mod retry;
mod s3;
pub mod transfer;
