//! Types shared by every ineedit crate: identifiers, closed status
//! enumerations, integer-cents money helpers and marketplace constants.

pub mod address;
pub mod constants;
pub mod error;
pub mod money;
pub mod types;

pub use address::ShippingAddress;
pub use error::ParseEnumError;
pub use types::*;
