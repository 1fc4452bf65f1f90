pub mod config;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod qa;
pub mod translate;
pub mod tts;
