pub mod app;
pub mod auth;
pub mod capture;
pub mod clinical;
pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod memory;
pub mod people;
pub mod state;
