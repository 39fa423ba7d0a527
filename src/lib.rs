pub mod config;
pub mod feed;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod rules;
pub mod schedule;
pub mod scheduler;
