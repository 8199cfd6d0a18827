//! Generic Access Profile pieces needed before a connection exists:
//! device addresses and advertising data.

pub mod advertising;
pub mod constants;
pub mod types;

pub use advertising::{parse_advertising_data, AdvertisingData};
pub use constants::*;
pub use types::*;
