//! Wire formats for the lock bridge's accessory-side control protocol.
//!
//! - [`tlv8`]: the tag-length-value primitive codec
//! - [`access_code`]: Access Code Control Point commands and responses

pub mod access_code;
pub mod tlv8;

pub use access_code::{
    AccessCodeOperation, AccessCodeParams, AccessCodeRecord, AccessCodeRequest,
    AccessCodeResponse,
};
pub use tlv8::{TlvItem, Tlv8Writer};
