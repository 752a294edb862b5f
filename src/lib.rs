pub mod config;
pub mod error;
pub mod gecko;
pub mod history;
pub mod http;
pub mod llm;
pub mod media;
pub mod prompt;
pub mod resolver;
