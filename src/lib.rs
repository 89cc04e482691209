pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod feed;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod status;
pub mod storage;
pub mod validation;
pub mod view;
