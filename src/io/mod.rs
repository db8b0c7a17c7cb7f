//! I/O module
//!
//! Handles seed loading, webhook replay input and card output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (seed row conversion, card output serialization)
//! - `seed_reader` - Asynchronous seed CSV reader
//! - `event_reader` - JSON-lines webhook reader

pub mod csv_format;
pub mod event_reader;
pub mod seed_reader;

pub use csv_format::{convert_seed_row, write_cards_csv, SeedRecord, SeedRow};
pub use event_reader::{EventReader, RawEvent};
pub use seed_reader::SeedReader;
