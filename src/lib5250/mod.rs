//! Rust implementation of the lib5250 core: the 5250 data stream engine
// Framing and transport live in telnet/record, the screen model in
// dbuffer/display/field/gui, and session drives both.

pub mod buffer;
pub mod codes;
pub mod dbuffer;
pub mod display;
pub mod field;
pub mod gui;
pub mod record;
pub mod session;
pub mod telnet;
pub mod terminal;
pub mod wtd;

// Re-exports for easy access
pub use buffer::ByteBuffer;
pub use codes::*;
pub use dbuffer::DisplayBuffer;
pub use display::Display;
pub use field::{Continuation, Field, FieldControls};
pub use gui::{MenuItem, Menubar, Scrollbar, Window, WindowBorder};
pub use record::Record;
pub use session::Session;
pub use telnet::{
    open_stream, parse_trace, DebugStream, Stream, StreamEvent, StreamHeader, TelnetStream, TraceEvent,
};
pub use terminal::{NullTerminal, Terminal, TerminalStats};
