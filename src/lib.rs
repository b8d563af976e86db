pub mod clients;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod repository;
pub mod service;
pub mod utils;
