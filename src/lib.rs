pub mod config;
pub mod ir;
pub mod pipeline;
pub mod placeholders;
pub mod preserve;
pub mod progress;
pub mod textutil;
