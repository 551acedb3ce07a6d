pub mod orchestrator;

pub use orchestrator::{fetch_and_parse_all_tabs, MultiTabOptions};
