//! Terminal binding
//!
//! A terminal renders the display and produces keystrokes. The core never
//! draws anything itself; it calls back into a `Terminal` whenever the
//! screen or the indicators change. `NullTerminal` is a headless
//! implementation used by the replay tool and the tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::display::Display;
use super::gui::{MenuItem, Menubar, Scrollbar, Window};
use crate::error::Result;

/// Event bits returned by `Terminal::waitevent`
pub const TN5250_TERMINAL_EVENT_KEY: i32 = 0x0001;
pub const TN5250_TERMINAL_EVENT_DATA: i32 = 0x0002;
pub const TN5250_TERMINAL_EVENT_QUIT: i32 = 0x0004;

/// Terminal capability flags
pub const TN5250_TERMINAL_HAS_COLOR: u32 = 0x0001;

/// A rendering backend
pub trait Terminal {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn term(&mut self) {}

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn flags(&self) -> u32 {
        0
    }

    /// Whether the backend can draw the enhanced 5250 GUI constructs
    fn enhanced(&self) -> bool {
        false
    }

    /// Redraw the screen from the current display buffer.
    fn update(&mut self, display: &Display);

    /// Redraw the status line.
    fn update_indicators(&mut self, display: &Display);

    /// Poll for terminal events; returns a mask of `TN5250_TERMINAL_EVENT_*`.
    fn waitevent(&mut self) -> i32 {
        0
    }

    /// Next keystroke, if one is waiting
    fn getkey(&mut self) -> Option<i32>;

    /// Echo a character typed into a field at (row, col).
    fn putkey(&mut self, _display: &Display, _key: u8, _row: usize, _col: usize) {}

    fn beep(&mut self);

    fn create_window(&mut self, _window: &Window) {}

    fn destroy_window(&mut self, _window: &Window) {}

    fn create_scrollbar(&mut self, _scrollbar: &Scrollbar) {}

    fn destroy_scrollbar(&mut self, _scrollbar: &Scrollbar) {}

    fn create_menubar(&mut self, _menubar: &Menubar) {}

    fn destroy_menubar(&mut self, _menubar: &Menubar) {}

    fn create_menuitem(&mut self, _menuitem: &MenuItem) {}

    fn destroy_menuitem(&mut self, _menuitem: &MenuItem) {}
}

/// Counters shared between a `NullTerminal` and whoever inspects it
#[derive(Debug, Default)]
pub struct TerminalStats {
    pub beeps: Cell<usize>,
    pub updates: Cell<usize>,
    pub indicator_updates: Cell<usize>,
    pub windows: Cell<usize>,
    pub menubars: Cell<usize>,
    pub scrollbars: Cell<usize>,
}

impl TerminalStats {
    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }

    fn drop_one(counter: &Cell<usize>) {
        counter.set(counter.get().saturating_sub(1));
    }
}

/// Headless terminal: keys come from a queue, output is only counted
#[derive(Debug)]
pub struct NullTerminal {
    width: usize,
    height: usize,
    enhanced: bool,
    keys: VecDeque<i32>,
    stats: Rc<TerminalStats>,
}

impl Default for NullTerminal {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl NullTerminal {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            enhanced: false,
            keys: VecDeque::new(),
            stats: Rc::new(TerminalStats::default()),
        }
    }

    pub fn with_enhanced(mut self, enhanced: bool) -> Self {
        self.enhanced = enhanced;
        self
    }

    pub fn push_key(&mut self, key: i32) {
        self.keys.push_back(key);
    }

    /// Handle to the counters; stays valid after the terminal is boxed.
    pub fn stats(&self) -> Rc<TerminalStats> {
        Rc::clone(&self.stats)
    }
}

impl Terminal for NullTerminal {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn enhanced(&self) -> bool {
        self.enhanced
    }

    fn update(&mut self, _display: &Display) {
        TerminalStats::bump(&self.stats.updates);
    }

    fn update_indicators(&mut self, _display: &Display) {
        TerminalStats::bump(&self.stats.indicator_updates);
    }

    fn waitevent(&mut self) -> i32 {
        if self.keys.is_empty() {
            0
        } else {
            TN5250_TERMINAL_EVENT_KEY
        }
    }

    fn getkey(&mut self) -> Option<i32> {
        self.keys.pop_front()
    }

    fn beep(&mut self) {
        TerminalStats::bump(&self.stats.beeps);
    }

    fn create_window(&mut self, _window: &Window) {
        TerminalStats::bump(&self.stats.windows);
    }

    fn destroy_window(&mut self, _window: &Window) {
        TerminalStats::drop_one(&self.stats.windows);
    }

    fn create_scrollbar(&mut self, _scrollbar: &Scrollbar) {
        TerminalStats::bump(&self.stats.scrollbars);
    }

    fn destroy_scrollbar(&mut self, _scrollbar: &Scrollbar) {
        TerminalStats::drop_one(&self.stats.scrollbars);
    }

    fn create_menubar(&mut self, _menubar: &Menubar) {
        TerminalStats::bump(&self.stats.menubars);
    }

    fn destroy_menubar(&mut self, _menubar: &Menubar) {
        TerminalStats::drop_one(&self.stats.menubars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_terminal_keys_and_stats() {
        let mut term = NullTerminal::new(132, 27);
        let stats = term.stats();
        assert_eq!((term.width(), term.height()), (132, 27));
        assert_eq!(term.waitevent(), 0);
        term.push_key(b'A' as i32);
        assert_eq!(term.waitevent(), TN5250_TERMINAL_EVENT_KEY);
        assert_eq!(term.getkey(), Some(b'A' as i32));
        assert_eq!(term.getkey(), None);
        term.beep();
        term.beep();
        assert_eq!(stats.beeps.get(), 2);
    }

    #[test]
    fn test_gui_counters() {
        let mut term = NullTerminal::default();
        let stats = term.stats();
        let window = Window::new(1, 1, 5, 20);
        term.create_window(&window);
        assert_eq!(stats.windows.get(), 1);
        term.destroy_window(&window);
        term.destroy_window(&window);
        assert_eq!(stats.windows.get(), 0);
    }
}
