pub mod analysis;
pub mod config;
pub mod ir;
pub mod lang;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod sheet;
pub mod textutil;
