//! fxline ECB - Euro foreign exchange reference rates
//!
//! Fetches one calendar year of daily reference rates (units of a currency
//! per euro) from the ECB data portal and parses the SDMX-ML generic data
//! payload with quick-xml.
//!
//! # Example
//!
//! ```ignore
//! use fxline_core::{Fetcher, PartitionUnit};
//! use fxline_ecb::EcbFetcher;
//!
//! let fetcher = EcbFetcher::new("USD")?;
//! let rates = fetcher.fetch(&PartitionUnit::year(2023))?;
//! println!("{} daily rates", rates.len());
//! ```

pub mod fetcher;
pub mod parser;

pub use fetcher::{ECB_DATA_API, EcbFetcher};
pub use parser::parse_generic_data;
