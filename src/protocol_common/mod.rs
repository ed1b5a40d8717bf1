//! Protocol helpers that are independent of the 5250 engine itself
//!
//! - [`ebcdic`] - EBCDIC/Latin-1 character map

pub mod ebcdic;

pub use ebcdic::CharMap;
