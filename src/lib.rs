//! tn5250-core: IBM 5250 workstation emulation over Telnet
//!
//! The crate decodes the 5250 data stream a host sends into a screen
//! model, applies operator keystrokes to it, and answers with the
//! records the host expects. Rendering is left to a `Terminal`
//! implementation supplied by the caller.

/// CONFIGURATION: Session settings with typed defaults and JSON persistence
pub mod config;

/// ERRORS: Error types shared by every layer
pub mod error;

/// PROTOCOL COMMON: Character translation shared by the protocol layers
pub mod protocol_common;

/// LIB5250: IBM 5250 protocol implementation
/// Record framing, display model, keyboard handling and the session engine
pub mod lib5250;

pub use config::SessionConfig;
pub use error::{Result, TN5250Error};
pub use lib5250::{Display, Session};
