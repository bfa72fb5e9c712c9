pub mod db;
pub mod error;
pub mod generator;
pub mod models;
pub mod planner;
pub mod prompts;
pub mod schema;
pub mod service;
