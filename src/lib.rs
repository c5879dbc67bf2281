pub mod config;
pub mod constants;
pub mod dedupe;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod logging;
pub mod matcher;
pub mod parsing;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod shapes;
pub mod storage;
pub mod types;
pub mod windows;
