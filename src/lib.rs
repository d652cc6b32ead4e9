//! Read-through Azure cost queries for dashboard time series.
//!
//! [`service::CostQueryService`] takes a batch of queries, serves each
//! subscription window from [`cache::WindowCache`] or pulls it through an
//! [`upstream::CostSource`], and renders it as a [`frame::Frame`].

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod frame;
pub mod models;
pub mod service;
pub mod upstream;
