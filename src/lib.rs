pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod phone;
pub mod reminders;
pub mod routes;
pub mod sms;
