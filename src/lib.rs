pub mod cli;
pub mod domain;
pub mod http;
pub mod repository;
pub mod services;
pub mod utils;
