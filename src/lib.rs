pub mod config;
pub mod database;
pub mod engine;
pub mod feed;
pub mod types;
pub mod web;
