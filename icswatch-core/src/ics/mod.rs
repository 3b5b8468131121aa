//! ICS file handling.

mod parse;

pub use parse::{parse_calendar_file, parse_events, scan_directory};
