//! Display: keyboard handling and presentation for a 5250 session
//!
//! The display owns the current `DisplayBuffer`, the buffers saved for a
//! later restore, the operator indicators and the keyboard state machine.
//! Keystrokes arrive through a bounded queue and are applied to the
//! buffer here; AID keys are not sent from this module but queued as AID
//! requests for the session to pick up with `take_aid_requests`.

use std::collections::VecDeque;
use std::fmt;

use super::buffer::ByteBuffer;
use super::codes::{
    aid_for_function_key, AID_ATTN, AID_CLEAR, AID_ENTER, AID_HELP, AID_PRINT, AID_RECORD_BS, AID_ROLL_DOWN,
    AID_ROLL_UP, AID_SYSREQ, AID_TESTREQ, K_ATTENTION, K_BACKSPACE, K_BACKTAB, K_CLEAR, K_DELETE, K_DOWN,
    K_DUPLICATE, K_END, K_ENTER, K_F1, K_F24, K_FIELDEXIT, K_FIELDHOME, K_FIELDMINUS, K_FIELDPLUS,
    K_FIRST_SPECIAL, K_HELP, K_HOME, K_INSERT, K_LEFT, K_NEWLINE, K_NEXTFLD, K_NEXTWORD, K_PREVFLD,
    K_PREVWORD, K_PRINT, K_RESET, K_RIGHT, K_ROLLDN, K_ROLLUP, K_SYSREQ, K_TAB, K_TESTREQ, K_UP,
    TN5250_KBDSRC_DUP_DISALLOWED, TN5250_KBDSRC_FER, TN5250_KBDSRC_FLDM_DISALLOWED, TN5250_KBDSRC_NONE,
    TN5250_KBDSRC_NOROOM, TN5250_KBDSRC_PROTECT, TN5250_KBDSRC_SIGNPOS, TN5250_KEYSTATE_HARDWARE,
    TN5250_KEYSTATE_LOCKED, TN5250_KEYSTATE_POSTHELP, TN5250_KEYSTATE_PREHELP, TN5250_KEYSTATE_UNLOCKED,
};
use super::dbuffer::{DisplayBuffer, WORD_WRAP_SPACE};
use super::field::{Field, FIELD_NUM_ONLY, FIELD_RIGHT_BLANK, FIELD_RIGHT_ZERO, FIELD_SIGNED_NUM};
use super::terminal::Terminal;
use super::wtd::WtdContext;
use crate::config::SessionConfig;
use crate::error::{BufferError, ConfigError, Result, TN5250Error};
use crate::protocol_common::ebcdic::CharMap;

// Display indicator flags
pub const TN5250_DISPLAY_IND_INHIBIT: u32 = 0x0001;
pub const TN5250_DISPLAY_IND_MESSAGE_WAITING: u32 = 0x0002;
pub const TN5250_DISPLAY_IND_X_SYSTEM: u32 = 0x0004;
pub const TN5250_DISPLAY_IND_X_CLOCK: u32 = 0x0008;
pub const TN5250_DISPLAY_IND_INSERT: u32 = 0x0010;
pub const TN5250_DISPLAY_IND_FER: u32 = 0x0020;
pub const TN5250_DISPLAY_IND_MACRO: u32 = 0x0040;

/// Type-ahead capacity
pub const TN5250_DISPLAY_KEYQ_SIZE: usize = 50;

/// Duplicate character written by the Dup key
const DUP_CHAR: u8 = 0x1C;

/// A command the host asked the workstation to run (STRPCCMD)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcCommand {
    pub command: String,
    /// Host expects the workstation to wait for completion
    pub wait: bool,
}

pub struct Display {
    dbuffer: DisplayBuffer,
    saved: Vec<(usize, DisplayBuffer)>,
    next_saved_id: usize,
    terminal: Option<Box<dyn Terminal>>,
    map: CharMap,
    indicators: u32,
    indicators_dirty: bool,
    pending_insert: bool,
    sign_key_hack: bool,
    field_minus_in_char: bool,
    uninhibited: bool,
    allow_strpccmd: bool,
    keystate: u8,
    key_src: u16,
    key_queue: VecDeque<i32>,
    msg_line: Option<Vec<u8>>,
    saved_msg_line: Option<Vec<u8>>,
    aid_requests: VecDeque<i32>,
    pc_commands: VecDeque<PcCommand>,
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("width", &self.dbuffer.width())
            .field("height", &self.dbuffer.height())
            .field("cursor", &(self.dbuffer.cursor_y(), self.dbuffer.cursor_x()))
            .field("indicators", &self.indicators)
            .field("keystate", &self.keystate)
            .field("key_src", &self.key_src)
            .field("has_terminal", &self.terminal.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

impl Display {
    pub fn new() -> Self {
        Self {
            dbuffer: DisplayBuffer::new(80, 24),
            saved: Vec::new(),
            next_saved_id: 1,
            terminal: None,
            map: CharMap::cp037(),
            indicators: 0,
            indicators_dirty: false,
            pending_insert: false,
            sign_key_hack: true,
            field_minus_in_char: false,
            uninhibited: false,
            allow_strpccmd: false,
            keystate: TN5250_KEYSTATE_UNLOCKED,
            key_src: TN5250_KBDSRC_NONE,
            key_queue: VecDeque::with_capacity(TN5250_DISPLAY_KEYQ_SIZE),
            msg_line: None,
            saved_msg_line: None,
            aid_requests: VecDeque::new(),
            pc_commands: VecDeque::new(),
        }
    }

    /// Apply the keyboard options and the character map from a config.
    pub fn config(&mut self, config: &SessionConfig) -> Result<()> {
        self.sign_key_hack = config.get_bool_or("sign_key_hack", self.sign_key_hack);
        self.uninhibited = config.get_bool_or("uninhibited", self.uninhibited);
        self.allow_strpccmd = config.get_bool_or("allow_strpccmd", self.allow_strpccmd);
        self.field_minus_in_char = config.get_bool_or("field_minus_in_char", self.field_minus_in_char);
        let map = config.get_string_or("map", "37");
        self.set_char_map(&map)
    }

    pub fn set_char_map(&mut self, name: &str) -> Result<()> {
        self.map = CharMap::by_name(name).ok_or_else(|| {
            TN5250Error::Config(ConfigError::InvalidValue { key: "map".to_string(), value: name.to_string() })
        })?;
        Ok(())
    }

    pub fn char_map(&self) -> &CharMap {
        &self.map
    }

    pub fn set_terminal(&mut self, mut terminal: Box<dyn Terminal>) -> Result<()> {
        terminal.init()?;
        self.terminal = Some(terminal);
        Ok(())
    }

    pub fn terminal(&self) -> Option<&dyn Terminal> {
        self.terminal.as_deref()
    }

    pub fn terminal_mut(&mut self) -> Option<&mut (dyn Terminal + 'static)> {
        self.terminal.as_deref_mut()
    }

    pub fn take_terminal(&mut self) -> Option<Box<dyn Terminal>> {
        self.terminal.take().map(|mut term| {
            term.term();
            term
        })
    }

    /// Run `f` against the terminal while it can still see the display.
    fn with_terminal<F>(&mut self, f: F)
    where
        F: FnOnce(&mut (dyn Terminal + 'static), &Display),
    {
        if let Some(mut term) = self.terminal.take() {
            f(term.as_mut(), self);
            self.terminal = Some(term);
        }
    }

    pub fn dbuffer(&self) -> &DisplayBuffer {
        &self.dbuffer
    }

    pub fn dbuffer_mut(&mut self) -> &mut DisplayBuffer {
        &mut self.dbuffer
    }

    /// Snapshot the current buffer; the returned handle restores it.
    pub fn push_dbuffer(&mut self) -> usize {
        let id = self.next_saved_id;
        self.next_saved_id += 1;
        self.saved.push((id, self.dbuffer.clone()));
        id
    }

    /// Replace the current buffer with a saved one. The handle is consumed.
    pub fn restore_dbuffer(&mut self, id: usize) -> Result<()> {
        let index = self
            .saved
            .iter()
            .position(|(saved, _)| *saved == id)
            .ok_or(TN5250Error::Buffer(BufferError::UnknownDisplayBuffer { id }))?;
        let (_, dbuffer) = self.saved.remove(index);
        self.dbuffer = dbuffer;
        Ok(())
    }

    pub fn saved_dbuffer_count(&self) -> usize {
        self.saved.len()
    }

    pub fn width(&self) -> usize {
        self.dbuffer.width()
    }

    pub fn height(&self) -> usize {
        self.dbuffer.height()
    }

    pub fn cursor_x(&self) -> usize {
        self.dbuffer.cursor_x()
    }

    pub fn cursor_y(&self) -> usize {
        self.dbuffer.cursor_y()
    }

    pub fn set_cursor(&mut self, y: usize, x: usize) {
        self.dbuffer.cursor_set(y, x);
    }

    pub fn char_at(&self, y: usize, x: usize) -> u8 {
        self.dbuffer.char_at(y, x)
    }

    pub fn addch(&mut self, c: u8) {
        self.dbuffer.addch(c);
    }

    pub fn repeat_char(&mut self, c: u8, count: usize) {
        self.dbuffer.repeat_char(c, count);
    }

    pub fn roll(&mut self, top: usize, bottom: usize, lines: i32) {
        self.dbuffer.roll(top, bottom, lines);
    }

    /// The screen as local text, one string per row
    pub fn screen_text(&self) -> Vec<String> {
        (0..self.height()).map(|row| self.dbuffer.row_text(row, &self.map)).collect()
    }

    // ===== indicators and keyboard state =====

    pub fn indicators(&self) -> u32 {
        self.indicators
    }

    pub fn indicator_set(&mut self, inds: u32) {
        self.indicators |= inds;
        self.indicators_dirty = true;
    }

    /// Clear indicators. Clearing INHIBIT puts back the message line that
    /// was saved when the operator error was shown.
    pub fn indicator_clear(&mut self, inds: u32) {
        self.indicators &= !inds;
        self.indicators_dirty = true;

        if inds & TN5250_DISPLAY_IND_INHIBIT != 0 {
            if let Some(saved) = self.saved_msg_line.take() {
                let row = self.dbuffer.msg_line();
                for (col, &c) in saved.iter().enumerate().take(self.width()) {
                    self.dbuffer.set_char_at(row, col, c);
                }
                self.msg_line = None;
            }
        }
    }

    pub fn inhibited(&self) -> bool {
        self.indicators & TN5250_DISPLAY_IND_INHIBIT != 0
    }

    pub fn inhibit(&mut self) {
        self.indicator_set(TN5250_DISPLAY_IND_INHIBIT);
    }

    pub fn uninhibit(&mut self) {
        self.indicator_clear(TN5250_DISPLAY_IND_INHIBIT);
    }

    pub fn keystate(&self) -> u8 {
        self.keystate
    }

    pub fn set_keystate(&mut self, keystate: u8) {
        self.keystate = keystate;
    }

    /// Keyboard error code of the last operator error
    pub fn key_src(&self) -> u16 {
        self.key_src
    }

    pub fn set_key_src(&mut self, code: u16) {
        self.key_src = code;
    }

    /// Lock the keyboard with an operator error, awaiting Help or Reset.
    fn operator_error(&mut self, code: u16) {
        log::debug!("operator error 0x{:04X}", code);
        self.keystate = TN5250_KEYSTATE_PREHELP;
        self.key_src = code;
        self.inhibit();
    }

    pub fn pending_insert(&self) -> bool {
        self.pending_insert
    }

    pub fn set_pending_insert(&mut self, y: usize, x: usize) {
        self.pending_insert = true;
        self.dbuffer.set_ic(y, x);
    }

    pub fn clear_pending_insert(&mut self) {
        self.pending_insert = false;
    }

    pub fn beep(&mut self) {
        log::debug!("beep");
        if let Some(term) = self.terminal.as_mut() {
            term.beep();
        }
    }

    // ===== clearing =====

    /// Clear to a 24x80 screen and lock the keyboard.
    pub fn clear_unit(&mut self) {
        self.reset_unit(24, 80);
    }

    /// Clear to a 27x132 screen and lock the keyboard.
    pub fn clear_unit_alternate(&mut self) {
        self.reset_unit(27, 132);
    }

    fn reset_unit(&mut self, rows: usize, cols: usize) {
        self.dbuffer.set_size(rows, cols);
        self.indicator_set(TN5250_DISPLAY_IND_X_SYSTEM);
        self.keystate = TN5250_KEYSTATE_LOCKED;
        self.indicator_clear(TN5250_DISPLAY_IND_INSERT | TN5250_DISPLAY_IND_INHIBIT | TN5250_DISPLAY_IND_FER);
        self.pending_insert = false;
        self.dbuffer.set_ic(0, 0);
        self.saved_msg_line = None;
        self.msg_line = None;
    }

    pub fn clear_format_table(&mut self) {
        self.dbuffer.clear_table();
        self.set_cursor(0, 0);
        self.indicator_set(TN5250_DISPLAY_IND_X_SYSTEM);
        self.keystate = TN5250_KEYSTATE_LOCKED;
        self.indicator_clear(TN5250_DISPLAY_IND_INSERT);
    }

    /// Blank a region, 1-based and inclusive. Rows between the first and
    /// last span `leftedge..=rightedge`.
    pub fn erase_region(
        &mut self,
        startrow: usize,
        startcol: usize,
        endrow: usize,
        endcol: usize,
        leftedge: usize,
        rightedge: usize,
    ) {
        let blank = self.map.to_remote(b' ');
        let (w, h) = (self.width(), self.height());
        let fill = |buf: &mut DisplayBuffer, row: usize, from: usize, to: usize| {
            if row == 0 || row > h {
                return;
            }
            for col in from.max(1)..=to.min(w) {
                buf.set_char_at(row - 1, col - 1, blank);
            }
        };
        if startrow == endrow {
            fill(&mut self.dbuffer, startrow, startcol, endcol);
            return;
        }
        for row in startrow..=endrow {
            if row == startrow {
                fill(&mut self.dbuffer, row, startcol, rightedge);
            } else if row == endrow {
                fill(&mut self.dbuffer, row, leftedge, endcol);
            } else {
                fill(&mut self.dbuffer, row, leftedge, rightedge);
            }
        }
    }

    // ===== message line =====

    pub fn save_msg_line(&mut self) {
        let row = self.dbuffer.msg_line();
        let start = row * self.width();
        self.saved_msg_line = Some(self.dbuffer.data()[start..start + self.width()].to_vec());
    }

    /// Show an operator message on the message line; it stays there until
    /// INHIBIT is cleared.
    pub fn set_msg_line(&mut self, msg: &[u8]) {
        let len = msg.len().min(self.width());
        self.msg_line = Some(msg[..len].to_vec());
        let row = self.dbuffer.msg_line();
        for (col, &c) in msg[..len].iter().enumerate() {
            self.dbuffer.set_char_at(row, col, c);
        }
    }

    // ===== terminal refresh =====

    /// Push the screen to the terminal. A pending PC command takes the
    /// place of the refresh.
    pub fn update(&mut self) {
        if let Some(msg) = &self.msg_line {
            let row = self.dbuffer.msg_line();
            for (col, &c) in msg.iter().enumerate() {
                self.dbuffer.set_char_at(row, col, c);
            }
        }
        if self.check_pccmd() {
            return;
        }
        let dirty = self.indicators_dirty;
        self.with_terminal(|term, display| {
            term.update(display);
            if dirty {
                term.update_indicators(display);
            }
        });
        if self.terminal.is_some() {
            self.indicators_dirty = false;
        }
    }

    /// Detect a STRPCCMD screen: a non-display attribute at (0,0), the
    /// `PCO ` signature at column 3 and a pending flag at column 1.
    fn check_pccmd(&mut self) -> bool {
        if !self.allow_strpccmd || self.dbuffer.data().len() < 135 {
            return false;
        }
        let signature = [(0, 0x27), (2, 0xFC), (3, 0xD7), (4, 0xC3), (5, 0xD6), (6, 0x40)];
        if signature.iter().any(|&(col, b)| self.char_at(0, col) != b) {
            return false;
        }
        match self.char_at(0, 1) {
            0x00 => {
                self.do_aidkey(AID_ENTER);
                return true;
            }
            0x80 => {}
            _ => return false,
        }

        let data = self.dbuffer.data();
        log::debug!(
            "PCO header bytes: {:02X} {:02X} {:02X} {:02X} {:02X}",
            data[7],
            data[8],
            data[9],
            data[10],
            data[11]
        );
        let wait = data[11] & 0x01 == 0;
        let command = self.map.remote_to_string(&data[12..135]).trim_end().to_string();
        log::info!("PC command requested (wait={}): {}", wait, command);
        self.pc_commands.push_back(PcCommand { command, wait });
        self.dbuffer.set_char_at(0, 1, 0x00);
        self.do_aidkey(AID_ENTER);
        true
    }

    pub fn take_pc_command(&mut self) -> Option<PcCommand> {
        self.pc_commands.pop_front()
    }

    /// The reconstructed Write To Display stream for the current screen,
    /// with the cursor as the insert-cursor position.
    pub fn make_wtd_data(&self) -> ByteBuffer {
        let mut ctx = WtdContext::new(&self.dbuffer);
        ctx.set_ic(self.cursor_y() + 1, self.cursor_x() + 1);
        ctx.convert()
    }

    // ===== fields and cursor placement =====

    pub fn field_at(&self, y: usize, x: usize) -> Option<usize> {
        self.dbuffer.field_yx(y, x)
    }

    /// Id of the field under the cursor
    pub fn current_field(&self) -> Option<usize> {
        self.field_at(self.cursor_y(), self.cursor_x())
    }

    fn field(&self, id: usize) -> Option<&Field> {
        self.dbuffer.field(id)
    }

    fn is_bypass(&self, id: usize) -> bool {
        self.field(id).map_or(true, Field::is_bypass)
    }

    fn entry_of(&self, id: usize) -> usize {
        self.field(id).map_or(0, |f| f.entry_id)
    }

    /// First field met scanning away from the cursor
    fn scan_for_field(&self, forward: bool) -> Option<usize> {
        let w = self.width();
        let total = w * self.height();
        let origin = self.cursor_y() * w + self.cursor_x();
        (1..total)
            .map(|n| if forward { (origin + n) % total } else { (origin + total - n) % total })
            .find_map(|pos| self.field_at(pos / w, pos % w))
    }

    /// The next non-bypass field after the cursor, wrapping.
    pub fn next_field(&self) -> Option<usize> {
        let count = self.dbuffer.field_count();
        if count == 0 {
            return None;
        }
        let start = match self.current_field() {
            Some(id) => (id + 1) % count,
            None => self.scan_for_field(true)?,
        };
        (0..count).map(|n| (start + n) % count).find(|&id| !self.is_bypass(id))
    }

    /// The closest non-bypass field before the cursor, wrapping.
    pub fn prev_field(&self) -> Option<usize> {
        let count = self.dbuffer.field_count();
        if count == 0 {
            return None;
        }
        let start = match self.current_field() {
            Some(id) => (id + count - 1) % count,
            None => self.scan_for_field(false)?,
        };
        (0..count).map(|n| (start + count - n) % count).find(|&id| !self.is_bypass(id))
    }

    /// Home is the IC position when one is pending, else the first
    /// non-bypass field, else (0, 0).
    pub fn set_cursor_home(&mut self) {
        if self.pending_insert {
            self.dbuffer.goto_ic();
            return;
        }
        let (y, x) = self
            .dbuffer
            .first_non_bypass()
            .and_then(|id| self.field(id))
            .map_or((0, 0), |f| (f.start_row, f.start_col));
        self.set_cursor(y, x);
    }

    pub fn set_cursor_field(&mut self, id: Option<usize>) {
        match id.and_then(|id| self.field(id)).map(|f| (f.start_row, f.start_col)) {
            Some((y, x)) => self.set_cursor(y, x),
            None => self.set_cursor_home(),
        }
    }

    /// Follow the current field's progression id if it has one.
    pub fn set_cursor_next_field(&mut self) {
        let progression = self.current_field().and_then(|id| self.field(id)).map_or(0, |f| f.progression_id());
        if progression != 0 {
            self.set_cursor_next_progression_field(progression as usize);
        } else {
            let next = self.next_field();
            self.set_cursor_field(next);
        }
    }

    pub fn set_cursor_next_progression_field(&mut self, entry: usize) {
        if entry == 0 {
            self.set_cursor_next_field();
            return;
        }
        for _ in 0..self.dbuffer.field_count() {
            let Some(id) = self.next_field() else {
                break;
            };
            self.set_cursor_field(Some(id));
            if self.entry_of(id) == entry {
                break;
            }
        }
    }

    /// Next non-bypass field outside the current continued entry
    pub fn set_cursor_next_logical_field(&mut self) {
        let Some(orig) = self.current_field() else {
            self.set_cursor_next_field();
            return;
        };
        let entry = self.entry_of(orig);
        for _ in 0..=self.dbuffer.field_count() {
            self.set_cursor_next_field();
            match self.current_field() {
                Some(id) if id != orig && self.entry_of(id) == entry => continue,
                _ => break,
            }
        }
    }

    pub fn set_cursor_prev_field(&mut self) {
        match self.current_field().map(|id| self.entry_of(id)) {
            Some(entry) if entry != 0 => self.set_cursor_prev_progression_field(entry),
            _ => {
                let prev = self.prev_field();
                self.set_cursor_field(prev);
            }
        }
    }

    /// Walk back to the field whose progression id names `entry`, or to
    /// the start of the current entry.
    pub fn set_cursor_prev_progression_field(&mut self, entry: usize) {
        if entry == 0 {
            return;
        }
        let Some(orig) = self.current_field() else {
            return;
        };
        if self.is_bypass(orig) {
            let prev = self.prev_field();
            self.set_cursor_field(prev);
            return;
        }

        let mut different_found = false;
        for _ in 0..=self.dbuffer.field_count() {
            let Some(id) = self.prev_field() else {
                break;
            };
            self.set_cursor_field(Some(id));

            if self.entry_of(id) == entry {
                if id == orig {
                    let prev = self.prev_field();
                    self.set_cursor_field(prev);
                    break;
                }
                if !different_found {
                    break;
                }
            } else {
                different_found = true;
            }

            if self.field(id).map_or(0, |f| f.progression_id() as usize) == entry {
                break;
            }
        }
    }

    pub fn set_cursor_prev_logical_field(&mut self) {
        self.set_cursor_prev_field();
        let Some(orig) = self.current_field() else {
            return;
        };
        let entry = self.entry_of(orig);
        for _ in 0..=self.dbuffer.field_count() {
            self.set_cursor_prev_field();
            match self.current_field() {
                Some(id) if id != orig && self.entry_of(id) == entry => continue,
                _ => break,
            }
        }
        self.set_cursor_next_field();
    }

    // ===== keyboard =====

    /// Queue a keystroke. A full queue beeps and drops the key.
    pub fn queue_key(&mut self, key: i32) {
        if self.key_queue.len() >= TN5250_DISPLAY_KEYQ_SIZE {
            log::debug!("beep: key queue full");
            self.beep();
            return;
        }
        self.key_queue.push_back(key);
    }

    pub fn queued_keys(&self) -> usize {
        self.key_queue.len()
    }

    /// The next queued key, left in the queue
    pub fn peek_key(&self) -> Option<i32> {
        self.key_queue.front().copied()
    }

    /// Remove and return the first queued key matching `pred`.
    pub fn take_queued_key<F: Fn(i32) -> bool>(&mut self, pred: F) -> Option<i32> {
        let index = self.key_queue.iter().position(|&k| pred(k))?;
        self.key_queue.remove(index)
    }

    /// Move every key the terminal has buffered into the queue.
    pub fn pull_terminal_keys(&mut self) {
        let mut keys = Vec::new();
        if let Some(term) = self.terminal.as_mut() {
            while let Some(key) = term.getkey() {
                keys.push(key);
            }
        }
        for key in keys {
            self.queue_key(key);
        }
    }

    /// Apply queued keys. Stops after a key that raised an AID request so
    /// the session can answer it before the rest of the type-ahead.
    /// Returns true when at least one key was handled.
    pub fn process_keys(&mut self) -> bool {
        let mut handled = false;
        while let Some(key) = self.key_queue.pop_front() {
            self.do_key(key);
            handled = true;
            if !self.aid_requests.is_empty() {
                break;
            }
        }
        if handled {
            self.update();
        }
        handled
    }

    /// AID codes raised by keys since the last call
    pub fn take_aid_requests(&mut self) -> Vec<i32> {
        self.aid_requests.drain(..).collect()
    }

    fn do_aidkey(&mut self, aid: i32) {
        log::debug!("AID request 0x{:02X}", aid);
        self.aid_requests.push_back(aid);
    }

    /// Whether a key may be processed in the current keyboard state.
    /// In POSTHELP with `uninhibited` set, navigation keys reset the error.
    fn key_allowed(&mut self, key: i32) -> bool {
        match self.keystate {
            TN5250_KEYSTATE_UNLOCKED => true,
            TN5250_KEYSTATE_HARDWARE => key == K_RESET,
            TN5250_KEYSTATE_LOCKED => matches!(key, K_SYSREQ | K_PRINT | K_ATTENTION),
            TN5250_KEYSTATE_PREHELP => matches!(key, K_RESET | K_HELP | K_PRINT | K_ATTENTION),
            TN5250_KEYSTATE_POSTHELP => {
                let navigation = matches!(key, K_ENTER | K_TAB | K_BACKTAB | K_ROLLDN | K_ROLLUP)
                    || (K_FIRST_SPECIAL..=K_F24).contains(&key);
                if self.uninhibited && navigation {
                    log::debug!("resetting posthelp state for key {}", key);
                    self.uninhibit();
                    self.keystate = TN5250_KEYSTATE_UNLOCKED;
                    true
                } else {
                    matches!(key, K_RESET | K_ATTENTION)
                }
            }
            _ => false,
        }
    }

    /// Handle one keystroke.
    pub fn do_key(&mut self, key: i32) {
        log::trace!("@key {}", key);

        if !self.key_allowed(key) {
            log::debug!("denying key {} in keyboard state {}", key, self.keystate);
            self.beep();
            return;
        }

        let mut clear_fer_after = false;
        if self.indicators & TN5250_DISPLAY_IND_FER != 0 {
            match key {
                K_LEFT | K_BACKSPACE => {
                    self.indicator_clear(TN5250_DISPLAY_IND_FER);
                    return;
                }
                K_UP | K_DOWN | K_RIGHT => self.indicator_clear(TN5250_DISPLAY_IND_FER),
                K_ENTER | K_FIELDEXIT | K_FIELDMINUS | K_FIELDPLUS | K_TAB | K_BACKTAB | K_RESET | K_HELP => {
                    clear_fer_after = true
                }
                _ if self.uninhibited && (K_F1..=K_F24).contains(&key) => clear_fer_after = true,
                _ => {
                    log::debug!("denying key {} in FER state", key);
                    self.operator_error(TN5250_KBDSRC_FER);
                    return;
                }
            }
        }

        match key {
            K_RESET => {
                self.uninhibit();
                self.keystate = TN5250_KEYSTATE_UNLOCKED;
            }
            K_BACKSPACE => self.kf_backspace(),
            K_LEFT => self.dbuffer.left(),
            K_RIGHT => self.dbuffer.right(1),
            K_UP => self.dbuffer.up(),
            K_DOWN => self.dbuffer.down(),
            K_HELP => self.do_aidkey(AID_HELP),
            K_HOME => self.kf_home(),
            K_END => self.kf_end(),
            K_DELETE => self.kf_delete(),
            K_INSERT => {
                if self.indicators & TN5250_DISPLAY_IND_INSERT != 0 {
                    self.indicator_clear(TN5250_DISPLAY_IND_INSERT);
                } else {
                    self.indicator_set(TN5250_DISPLAY_IND_INSERT);
                }
            }
            K_TAB => self.set_cursor_next_logical_field(),
            K_BACKTAB => self.kf_backtab(),
            K_ENTER => self.do_aidkey(AID_ENTER),
            K_ROLLDN => self.do_aidkey(AID_ROLL_DOWN),
            K_ROLLUP => self.do_aidkey(AID_ROLL_UP),
            K_CLEAR => self.do_aidkey(AID_CLEAR),
            K_FIELDEXIT => self.kf_field_exit(),
            K_FIELDPLUS => self.kf_field_plus(),
            K_FIELDMINUS => self.kf_field_minus(),
            K_TESTREQ => self.do_aidkey(AID_TESTREQ),
            K_SYSREQ => self.do_aidkey(AID_SYSREQ),
            K_ATTENTION => {
                self.uninhibit();
                self.keystate = TN5250_KEYSTATE_UNLOCKED;
                self.do_aidkey(AID_ATTN);
            }
            K_PRINT => self.do_aidkey(AID_PRINT),
            K_DUPLICATE => self.kf_dup(),
            K_NEXTWORD => self.dbuffer.nextword(),
            K_PREVWORD => self.dbuffer.prevword(),
            K_NEXTFLD => self.kf_nextfld(),
            K_PREVFLD => self.kf_prevfld(),
            K_FIELDHOME => self.kf_fieldhome(),
            K_NEWLINE => self.kf_newline(),
            _ if (K_F1..=K_F24).contains(&key) => {
                if let Some(aid) = aid_for_function_key(key - K_F1 + 1) {
                    self.do_aidkey(aid);
                }
            }
            0x20..=0xFF => self.interactive_addch(key as u8),
            _ => log::debug!("ignoring key {}", key),
        }

        if clear_fer_after {
            self.indicator_clear(TN5250_DISPLAY_IND_FER);
        }
    }

    /// Type a local character into the field under the cursor.
    fn interactive_addch(&mut self, ch: u8) {
        let Some(id) = self.current_field().filter(|&id| !self.is_bypass(id)) else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        let Some(field) = self.field(id).cloned() else {
            return;
        };

        let mut ch = ch;
        if field.is_monocase() && ch.is_ascii_alphabetic() {
            ch = ch.to_ascii_uppercase();
        }

        if self.sign_key_hack && (field.is_num_only() || field.is_signed_num()) {
            match ch {
                b'+' => return self.kf_field_plus(),
                b'-' => return self.kf_field_minus(),
                _ => {}
            }
        }

        if let Err(code) = field.valid_char(ch) {
            log::debug!("invalid character for {} field", field.description());
            self.operator_error(code);
            return;
        }

        let (y, x) = (self.cursor_y(), self.cursor_x());
        let end_of_field = y == field.end_row() && x == field.end_col();
        let progression = if end_of_field { field.progression_id() as usize } else { 0 };

        if end_of_field && field.is_signed_num() {
            self.operator_error(TN5250_KBDSRC_SIGNPOS);
            return;
        }

        let remote = self.map.to_remote(ch);
        if self.indicators & TN5250_DISPLAY_IND_INSERT != 0 {
            let last = self.dbuffer.continued_group(id).last().copied().unwrap_or(id);
            let data = self.dbuffer.field_data(last);
            let mut ofs = data.len().saturating_sub(1);
            if field.is_signed_num() {
                ofs = ofs.saturating_sub(1);
            }
            let occupied = data.get(ofs).map_or(false, |&c| c != WORD_WRAP_SPACE && self.map.to_local(c) != b' ');
            if occupied {
                self.operator_error(TN5250_KBDSRC_NOROOM);
                return;
            }
            let shift = field.count_right(y, x);
            if field.is_wordwrap() {
                self.wordwrap_insert(remote, shift);
            } else {
                self.dbuffer.ins(id, remote, shift);
            }
        } else if field.is_wordwrap() || (field.is_continued_last() && self.prev_is_wordwrap(id)) {
            self.wordwrap_addch(remote);
        } else {
            self.with_terminal(|term, display| term.putkey(display, ch, y, x));
            self.dbuffer.addch(remote);
        }

        self.dbuffer.set_mdt(id);

        if end_of_field && !field.is_wordwrap() {
            if field.is_fer() {
                self.indicator_set(TN5250_DISPLAY_IND_FER);
                self.set_cursor(field.end_row(), field.end_col());
            } else {
                self.field_adjust(id);
                if field.is_auto_enter() {
                    self.do_aidkey(AID_ENTER);
                    return;
                }
                if progression != 0 {
                    self.set_cursor_next_progression_field(progression);
                } else {
                    // addch may have left the cursor past the field end
                    self.dbuffer.left();
                    self.set_cursor_next_field();
                }
            }
        }
    }

    fn prev_is_wordwrap(&self, id: usize) -> bool {
        id.checked_sub(1).and_then(|prev| self.field(prev)).map_or(false, Field::is_wordwrap)
    }

    /// Right-justify a field's data, filling on the left with `fill`.
    /// The sign position of a signed numeric field stays put.
    fn shift_right(&mut self, id: usize, fill: u8) {
        let signed = self.field(id).map_or(false, Field::is_signed_num);
        self.dbuffer.set_mdt(id);
        let data = self.dbuffer.field_data_mut(id);
        if data.is_empty() {
            return;
        }
        let mut end = data.len() - 1;
        if signed {
            if end == 0 {
                return;
            }
            end -= 1;
        }

        let is_blank = |c: u8| c == 0 || c == 0x40;
        let mut n = 0;
        while n <= end && is_blank(data[n]) {
            data[n] = fill;
            n += 1;
        }
        if n > end {
            return;
        }
        while is_blank(data[end]) {
            data.copy_within(0..end, 1);
            data[0] = fill;
        }
    }

    /// Adjust field data as its FFW asks; signed numeric fields are always
    /// right adjusted with blanks.
    fn field_adjust(&mut self, id: usize) {
        let Some(field) = self.field(id) else {
            return;
        };
        let mut fill_type = field.mand_fill_type();
        if field.field_type() == FIELD_SIGNED_NUM {
            fill_type = FIELD_RIGHT_BLANK;
        }
        match fill_type {
            FIELD_RIGHT_ZERO => {
                let fill = self.map.to_remote(b'0');
                self.shift_right(id, fill);
            }
            FIELD_RIGHT_BLANK => {
                let fill = self.map.to_remote(b' ');
                self.shift_right(id, fill);
            }
            _ => {}
        }
        self.dbuffer.set_mdt(id);
    }

    /// Null the rest of the field (and of its continued group) from the
    /// cursor, then adjust. Nothing is nulled while FER is showing.
    fn field_pad_and_adjust(&mut self, id: usize) {
        if self.indicators & TN5250_DISPLAY_IND_FER == 0 {
            if let Some(field) = self.field(id).cloned() {
                let from = field.count_left(self.cursor_y(), self.cursor_x());
                let data = self.dbuffer.field_data_mut(id);
                let mut len = data.len();
                if field.is_signed_num() {
                    len = len.saturating_sub(1);
                }
                if from < len {
                    data[from..len].iter_mut().for_each(|c| *c = 0);
                }

                if field.is_continued() && !field.is_continued_last() {
                    let group = self.dbuffer.continued_group(id);
                    for &next in group.iter().skip_while(|&&g| g != id).skip(1) {
                        self.dbuffer.field_data_mut(next).iter_mut().for_each(|c| *c = 0);
                    }
                }
            }
        }
        self.field_adjust(id);
    }

    fn kf_field_exit(&mut self) {
        let Some(id) = self.current_field().filter(|&id| !self.is_bypass(id)) else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        self.field_pad_and_adjust(id);
        if self.field(id).map_or(false, Field::is_auto_enter) {
            self.do_aidkey(AID_ENTER);
            return;
        }
        self.set_cursor_next_logical_field();
    }

    fn kf_field_plus(&mut self) {
        log::trace!("Field+");
        let Some(id) = self.current_field().filter(|&id| !self.is_bypass(id)) else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        self.field_pad_and_adjust(id);

        if self.field(id).map_or(false, |f| f.field_type() == FIELD_SIGNED_NUM) {
            if let Some(sign) = self.dbuffer.field_data_mut(id).last_mut() {
                *sign = 0;
            }
        }

        if self.field(id).map_or(false, Field::is_auto_enter) {
            self.do_aidkey(AID_ENTER);
            return;
        }
        self.set_cursor_next_logical_field();
    }

    fn kf_field_minus(&mut self) {
        log::trace!("Field-");
        let numeric = |f: &Field| matches!(f.field_type(), FIELD_SIGNED_NUM | FIELD_NUM_ONLY);
        let Some(id) = self.current_field().filter(|&id| self.field(id).map_or(false, numeric)) else {
            if self.field_minus_in_char {
                self.kf_field_exit();
            } else {
                self.operator_error(TN5250_KBDSRC_FLDM_DISALLOWED);
            }
            return;
        };

        self.field_pad_and_adjust(id);

        let num_only = self.field(id).map_or(false, |f| f.field_type() == FIELD_NUM_ONLY);
        let minus = self.map.to_remote(b'-');
        if let Some(last) = self.dbuffer.field_data_mut(id).last_mut() {
            *last = if num_only { (*last & 0x0F) | 0xD0 } else { minus };
        }

        if self.field(id).map_or(false, Field::is_auto_enter) {
            self.do_aidkey(AID_ENTER);
            return;
        }
        self.set_cursor_next_logical_field();
    }

    fn kf_dup(&mut self) {
        let Some(id) = self.current_field().filter(|&id| !self.is_bypass(id)) else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        let Some(field) = self.field(id).cloned() else {
            return;
        };
        self.dbuffer.set_mdt(id);

        if !field.is_dup_enable() {
            self.operator_error(TN5250_KBDSRC_DUP_DISALLOWED);
            return;
        }

        let from = field.count_left(self.cursor_y(), self.cursor_x());
        let data = self.dbuffer.field_data_mut(id);
        if from < data.len() {
            data[from..].iter_mut().for_each(|c| *c = DUP_CHAR);
        }

        if field.is_fer() {
            self.indicator_set(TN5250_DISPLAY_IND_FER);
            self.set_cursor(field.end_row(), field.end_col());
        } else {
            self.field_adjust(id);
            if field.is_auto_enter() {
                self.do_aidkey(AID_ENTER);
                return;
            }
            self.set_cursor_next_field();
        }
    }

    /// Left one position; from the first position of a field, to the last
    /// position of the previous field.
    fn kf_backspace(&mut self) {
        let Some(id) = self.current_field() else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        let at_start = self.field(id).map_or(false, |f| f.start_row == self.cursor_y() && f.start_col == self.cursor_x());
        if !at_start {
            self.dbuffer.left();
            return;
        }
        let Some(prev) = self.prev_field() else {
            return;
        };
        self.set_cursor_field(Some(prev));
        let len = self.field(prev).map_or(0, |f| f.length);
        if len > 1 {
            self.dbuffer.right(len - 1);
        }
    }

    fn kf_backtab(&mut self) {
        match self.current_field() {
            Some(id) if self.field(id).map_or(0, |f| f.count_left(self.cursor_y(), self.cursor_x())) > 0 => {
                self.set_cursor_field(Some(id));
            }
            _ => self.set_cursor_prev_logical_field(),
        }
    }

    /// After the last non-null character of the field, or the field end
    /// when the field is full.
    fn kf_end(&mut self) {
        let Some(id) = self.current_field().filter(|&id| !self.is_bypass(id)) else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        let Some(field) = self.field(id).cloned() else {
            return;
        };
        let data = self.dbuffer.field_data(id);
        let (y, x) = match data.last() {
            Some(&0) => {
                let used = data.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
                let pos = (field.start_pos() + used) % (self.width() * self.height());
                (pos / self.width(), pos % self.width())
            }
            _ => (field.end_row(), field.end_col()),
        };
        self.set_cursor(y, x);
    }

    /// Go home; pressing Home at home sends Record Backspace.
    fn kf_home(&mut self) {
        let (gy, gx) = if self.pending_insert {
            self.dbuffer.ic()
        } else {
            self.dbuffer
                .first_non_bypass()
                .and_then(|id| self.field(id))
                .map_or((0, 0), |f| (f.start_row, f.start_col))
        };
        if (gy, gx) == (self.cursor_y(), self.cursor_x()) {
            self.do_aidkey(AID_RECORD_BS);
        } else {
            self.set_cursor(gy, gx);
        }
    }

    fn kf_delete(&mut self) {
        let Some(id) = self.current_field().filter(|&id| !self.is_bypass(id)) else {
            self.operator_error(TN5250_KBDSRC_PROTECT);
            return;
        };
        self.dbuffer.set_mdt(id);
        let Some(field) = self.field(id).cloned() else {
            return;
        };
        if field.is_wordwrap() {
            self.wordwrap_delete();
            return;
        }
        let shift = field.count_right(self.cursor_y(), self.cursor_x());
        self.dbuffer.del(id, shift);
    }

    fn at_field_start(&self) -> bool {
        self.current_field()
            .and_then(|id| self.field(id))
            .map_or(false, |f| f.start_row == self.cursor_y() && f.start_col == self.cursor_x())
    }

    fn char_under_cursor(&self) -> u8 {
        self.char_at(self.cursor_y(), self.cursor_x())
    }

    /// Back to the previous word, stopping at a field start.
    fn kf_prevfld(&mut self) {
        let mut state = 0;
        for _ in 1..self.width() * self.height() {
            self.dbuffer.left();
            if self.at_field_start() {
                break;
            }
            let c = self.char_under_cursor();
            match state {
                0 if c <= 0x40 => state = 1,
                1 if c > 0x40 => state = 2,
                2 if c <= 0x40 => {
                    self.dbuffer.right(1);
                    return;
                }
                _ => {}
            }
        }
    }

    /// On to the next word, stopping at a field start.
    fn kf_nextfld(&mut self) {
        let mut found_blank = false;
        for _ in 1..self.width() * self.height() {
            self.dbuffer.right(1);
            let c = self.char_under_cursor();
            if c <= 0x40 {
                found_blank = true;
            }
            if found_blank && c > 0x40 {
                break;
            }
            if self.at_field_start() {
                break;
            }
        }
    }

    fn kf_fieldhome(&mut self) {
        match self.current_field().filter(|&id| !self.is_bypass(id)).and_then(|id| self.field(id)) {
            Some(f) => {
                let (y, x) = (f.start_row, f.start_col);
                self.set_cursor(y, x);
            }
            None => self.operator_error(TN5250_KBDSRC_PROTECT),
        }
    }

    /// Start of the next row, or the next input field when that cell is
    /// not in one.
    fn kf_newline(&mut self) {
        let y = self.cursor_y();
        self.set_cursor(y, 0);
        self.dbuffer.down();
        if self.current_field().map_or(true, |id| self.is_bypass(id)) {
            self.set_cursor_next_field();
        }
    }

    // ===== word wrap =====

    /// Fields of the word-wrap group under the cursor, the index of the
    /// cursor's field within it and that field.
    fn wordwrap_context(&self) -> Option<(Vec<usize>, usize, Field)> {
        let id = self.current_field()?;
        let field = self.field(id)?.clone();
        let group = self.dbuffer.continued_group(id);
        let index = group.iter().position(|&g| g == id)?;
        Some((group, index, field))
    }

    /// Group text from `from` onwards, fields joined by soft spaces
    fn group_text(&self, group: &[usize]) -> Vec<u8> {
        let mut text = Vec::new();
        for (n, &id) in group.iter().enumerate() {
            if n > 0 {
                text.push(WORD_WRAP_SPACE);
            }
            text.extend_from_slice(self.dbuffer.field_data(id));
        }
        text
    }

    /// Keep the cursor inside the field it was typed in; past the end it
    /// moves on to the next field.
    fn wordwrap_settle_cursor(&mut self, field: &Field) {
        self.dbuffer.right(1);
        if self.cursor_x() > field.end_col() {
            self.dbuffer.left();
            self.set_cursor_next_field();
        }
    }

    fn wordwrap_addch(&mut self, c: u8) {
        let Some((group, index, field)) = self.wordwrap_context() else {
            return;
        };
        let (y, x) = (self.cursor_y(), self.cursor_x());
        self.dbuffer.set_char_at(y, x, c);

        // A space near the start of a field may let a word move up a line
        let start = if field.is_continued_first() { index } else { index.saturating_sub(1) };
        let text = self.group_text(&group[start..]);
        wordwrap(&mut self.dbuffer, &self.map, &text, &group[start..]);
        self.wordwrap_settle_cursor(&field);
    }

    fn wordwrap_insert(&mut self, c: u8, shift: usize) {
        let Some((group, index, field)) = self.wordwrap_context() else {
            return;
        };
        let start = if field.is_continued_first() { index } else { index.saturating_sub(1) };
        let offset = field.length.saturating_sub(shift + 1);

        let mut text = Vec::new();
        for (n, &id) in group[start..].iter().enumerate() {
            if n > 0 {
                text.push(WORD_WRAP_SPACE);
            }
            let data = self.dbuffer.field_data(id);
            if id == field.id {
                let split = offset.min(data.len());
                text.extend_from_slice(&data[..split]);
                text.push(c);
                text.extend_from_slice(&data[split..]);
            } else {
                text.extend_from_slice(data);
            }
        }
        wordwrap(&mut self.dbuffer, &self.map, &text, &group[start..]);
        self.wordwrap_settle_cursor(&field);
    }

    fn wordwrap_delete(&mut self) {
        let Some((group, index, field)) = self.wordwrap_context() else {
            return;
        };
        let shift = field.count_right(self.cursor_y(), self.cursor_x());
        self.dbuffer.del_this_field_only(shift);
        let text = self.group_text(&group[index..]);
        wordwrap(&mut self.dbuffer, &self.map, &text, &group[index..]);
    }

    /// Flow host-supplied text into the word-wrap group at the cursor.
    pub fn wordwrap_write(&mut self, text: &[u8]) {
        let Some((group, index, field)) = self.wordwrap_context() else {
            return;
        };
        if !field.is_wordwrap() {
            return;
        }
        wordwrap(&mut self.dbuffer, &self.map, text, &group[index..]);
    }
}

/// Re-flow `text` word by word into the fields `group`, first to last.
///
/// Words end at an EBCDIC space, which is kept, or at the soft space
/// `WORD_WRAP_SPACE`, which is not. A word that does not fit on the
/// current field moves to the next one; cells left over are filled with
/// soft spaces. The cursor ends up on the character that had as many
/// non-soft characters before it as the character under the cursor had
/// before the re-flow.
pub fn wordwrap(buffer: &mut DisplayBuffer, map: &CharMap, text: &[u8], group: &[usize]) {
    let Some(lengths) = group.iter().map(|&id| buffer.field(id).map(|f| f.length)).collect::<Option<Vec<_>>>() else {
        return;
    };
    if group.is_empty() {
        return;
    }

    let w = buffer.width();
    let cursor_pos = buffer.cursor_y() * w + buffer.cursor_x();
    let cursor_field = buffer.field_yx(buffer.cursor_y(), buffer.cursor_x());
    let mut offset = 0;
    for (&id, &len) in group.iter().zip(&lengths) {
        if Some(id) == cursor_field {
            offset += buffer.field(id).map_or(0, |f| cursor_pos.saturating_sub(f.start_pos()));
            break;
        }
        offset += len + 1;
    }
    let keep = text[..offset.min(text.len())].iter().filter(|&&c| c != WORD_WRAP_SPACE).count();

    let space = map.to_remote(b' ');
    let mut target = 0;
    let mut line: Vec<u8> = Vec::new();
    let mut word: Vec<u8> = Vec::new();

    let place_word = |line: &mut Vec<u8>, word: &mut Vec<u8>, target: &mut usize, buffer: &mut DisplayBuffer| {
        if word.is_empty() {
            return;
        }
        let gap = !line.is_empty() && line.last() != Some(&space);
        let needed = line.len() + usize::from(gap) + word.len();
        if !line.is_empty() && needed > lengths[*target] {
            write_line(buffer, group[*target], line);
            if *target + 1 < group.len() {
                *target += 1;
            }
            line.clear();
        } else if gap {
            line.push(space);
        }
        line.append(word);
    };

    for &c in text {
        if c != WORD_WRAP_SPACE && map.to_local(c) != b' ' {
            word.push(c);
            continue;
        }
        place_word(&mut line, &mut word, &mut target, buffer);
        if c != WORD_WRAP_SPACE {
            line.push(c);
        }
    }
    place_word(&mut line, &mut word, &mut target, buffer);
    write_line(buffer, group[target], &line);
    for &id in &group[target + 1..] {
        write_line(buffer, id, &[]);
    }

    let mut seen = 0;
    for &id in group {
        let Some((start, end)) = buffer.field(id).map(|f| (f.start_pos(), f.end_pos())) else {
            continue;
        };
        for pos in start..=end.min(buffer.data().len() - 1) {
            if buffer.data()[pos] != WORD_WRAP_SPACE {
                if seen >= keep {
                    buffer.cursor_set(pos / w, pos % w);
                    return;
                }
                seen += 1;
            }
        }
    }
}

/// Write a line into a field, padding with soft spaces.
fn write_line(buffer: &mut DisplayBuffer, id: usize, line: &[u8]) {
    for (i, cell) in buffer.field_data_mut(id).iter_mut().enumerate() {
        *cell = line.get(i).copied().unwrap_or(WORD_WRAP_SPACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib5250::field::{Continuation, FieldControls, FFW_AUTO_ENTER, FFW_BYPASS, FFW_FER};
    use crate::lib5250::terminal::NullTerminal;

    fn display_with_terminal() -> (Display, std::rc::Rc<crate::lib5250::terminal::TerminalStats>) {
        let mut display = Display::new();
        let term = NullTerminal::new(80, 24);
        let stats = term.stats();
        display.set_terminal(Box::new(term)).unwrap();
        (display, stats)
    }

    fn input_field(ffw: u16, row: usize, col: usize, length: usize) -> Field {
        Field::new(0x4000 | ffw, 0x20, row, col, length, 80)
    }

    fn wordwrap_field(col: usize, row: usize, continuation: Continuation, wrap: bool) -> Field {
        input_field(0, row, col, 8).with_controls(FieldControls {
            continuation,
            wordwrap: wrap,
            ..FieldControls::default()
        })
    }

    fn type_str(display: &mut Display, s: &str) {
        for b in s.bytes() {
            display.do_key(b as i32);
        }
    }

    fn field_text(display: &Display, id: usize) -> String {
        display
            .dbuffer()
            .field_data(id)
            .iter()
            .map(|&b| if b == 0 { '.' } else { display.char_map().to_char(b) })
            .collect()
    }

    #[test]
    fn test_typing_sets_mdt_and_advances() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(0, 0, 0, 3));
        display.dbuffer_mut().add_field(input_field(0, 1, 0, 3));
        display.set_cursor(0, 0);
        type_str(&mut display, "ABC");
        assert_eq!(field_text(&display, 0), "ABC");
        assert!(display.dbuffer().field(0).unwrap().is_modified());
        assert!(display.dbuffer().master_mdt());
        assert_eq!((display.cursor_y(), display.cursor_x()), (1, 0));
    }

    #[test]
    fn test_locked_keyboard_beeps() {
        let (mut display, stats) = display_with_terminal();
        display.dbuffer_mut().add_field(input_field(0, 0, 0, 5));
        display.set_keystate(TN5250_KEYSTATE_LOCKED);
        display.do_key(b'A' as i32);
        assert_eq!(stats.beeps.get(), 1);
        assert_eq!(display.char_at(0, 0), 0);
        display.do_key(K_SYSREQ);
        assert_eq!(display.take_aid_requests(), vec![AID_SYSREQ]);
        assert_eq!(stats.beeps.get(), 1);
    }

    #[test]
    fn test_protected_area_error() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(FFW_BYPASS, 0, 0, 5));
        display.do_key(b'A' as i32);
        assert_eq!(display.keystate(), TN5250_KEYSTATE_PREHELP);
        assert_eq!(display.key_src(), TN5250_KBDSRC_PROTECT);
        assert!(display.inhibited());

        display.do_key(b'B' as i32);
        assert_eq!(display.char_at(0, 0), 0);
        display.do_key(K_RESET);
        assert_eq!(display.keystate(), TN5250_KEYSTATE_UNLOCKED);
        assert!(!display.inhibited());
    }

    #[test]
    fn test_error_message_line_restored() {
        let mut display = Display::new();
        let map = CharMap::cp037();
        let original = map.str_to_remote("STATUS");
        for (col, &b) in original.iter().enumerate() {
            display.dbuffer_mut().set_char_at(23, col, b);
        }
        display.save_msg_line();
        display.set_msg_line(&map.str_to_remote("ERROR!"));
        display.inhibit();
        assert_eq!(display.screen_text()[23].trim_end(), "ERROR!");
        display.uninhibit();
        assert_eq!(display.screen_text()[23].trim_end(), "STATUS");
    }

    #[test]
    fn test_field_exit_right_adjusts_numeric() {
        let mut display = Display::new();
        // numeric only, right adjust zero fill
        display.dbuffer_mut().add_field(input_field(FIELD_NUM_ONLY | 0x0005, 0, 0, 5));
        display.dbuffer_mut().add_field(input_field(0, 2, 0, 5));
        type_str(&mut display, "12");
        display.do_key(K_FIELDEXIT);
        assert_eq!(field_text(&display, 0), "00012");
        assert_eq!((display.cursor_y(), display.cursor_x()), (2, 0));
        assert!(display.take_aid_requests().is_empty());
    }

    #[test]
    fn test_field_minus_on_numeric_only() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(FIELD_NUM_ONLY | 0x0006, 0, 0, 4));
        type_str(&mut display, "42");
        display.do_key(K_FIELDMINUS);
        let data = display.dbuffer().field_data(0).to_vec();
        assert_eq!(data, vec![0x40, 0x40, 0xF4, 0xD2]);
    }

    #[test]
    fn test_field_minus_disallowed_in_char_field() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(0, 0, 0, 4));
        display.do_key(K_FIELDMINUS);
        assert_eq!(display.key_src(), TN5250_KBDSRC_FLDM_DISALLOWED);
    }

    #[test]
    fn test_fer_requires_field_exit() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(FFW_FER, 0, 0, 2));
        display.dbuffer_mut().add_field(input_field(0, 1, 0, 2));
        type_str(&mut display, "AB");
        assert!(display.indicators() & TN5250_DISPLAY_IND_FER != 0);
        assert_eq!((display.cursor_y(), display.cursor_x()), (0, 1));

        display.do_key(K_FIELDEXIT);
        assert_eq!(display.indicators() & TN5250_DISPLAY_IND_FER, 0);
        assert_eq!((display.cursor_y(), display.cursor_x()), (1, 0));
        assert_eq!(field_text(&display, 0), "AB");
    }

    #[test]
    fn test_fer_blocks_data_keys() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(FFW_FER, 0, 0, 2));
        type_str(&mut display, "AB");
        display.do_key(b'C' as i32);
        assert_eq!(display.key_src(), TN5250_KBDSRC_FER);
        assert_eq!(display.keystate(), TN5250_KEYSTATE_PREHELP);
        assert_eq!(field_text(&display, 0), "AB");
    }

    #[test]
    fn test_auto_enter_raises_enter() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(FFW_AUTO_ENTER, 0, 0, 2));
        type_str(&mut display, "XY");
        assert_eq!(display.take_aid_requests(), vec![AID_ENTER]);
    }

    #[test]
    fn test_insert_mode_noroom() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(0, 0, 0, 3));
        type_str(&mut display, "AB");
        display.set_cursor(0, 0);
        display.do_key(K_INSERT);
        display.do_key(b'X' as i32);
        assert_eq!(field_text(&display, 0), "XAB");
        display.set_cursor(0, 0);
        display.do_key(b'Y' as i32);
        assert_eq!(display.key_src(), TN5250_KBDSRC_NOROOM);
    }

    #[test]
    fn test_delete_and_end_keys() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(0, 0, 0, 6));
        type_str(&mut display, "ABCD");
        display.set_cursor(0, 1);
        display.do_key(K_DELETE);
        assert_eq!(field_text(&display, 0), "ACD...");
        display.do_key(K_END);
        assert_eq!((display.cursor_y(), display.cursor_x()), (0, 3));
    }

    #[test]
    fn test_home_twice_sends_record_backspace() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(0, 3, 4, 6));
        display.set_cursor(10, 10);
        display.do_key(K_HOME);
        assert_eq!((display.cursor_y(), display.cursor_x()), (3, 4));
        display.do_key(K_HOME);
        assert_eq!(display.take_aid_requests(), vec![AID_RECORD_BS]);
    }

    #[test]
    fn test_tab_skips_continued_entry() {
        let mut display = Display::new();
        let cont = |col, continuation| {
            input_field(0, 0, col, 3).with_controls(FieldControls { continuation, ..FieldControls::default() })
        };
        display.dbuffer_mut().add_field(cont(0, Continuation::First));
        display.dbuffer_mut().add_field(cont(4, Continuation::Last));
        display.dbuffer_mut().add_field(input_field(0, 1, 0, 3));
        display.set_cursor(0, 0);
        display.do_key(K_TAB);
        assert_eq!((display.cursor_y(), display.cursor_x()), (1, 0));
        display.do_key(K_TAB);
        assert_eq!((display.cursor_y(), display.cursor_x()), (0, 0));
    }

    #[test]
    fn test_key_queue_bounded() {
        let (mut display, stats) = display_with_terminal();
        for _ in 0..TN5250_DISPLAY_KEYQ_SIZE + 2 {
            display.queue_key(K_RIGHT);
        }
        assert_eq!(display.queued_keys(), TN5250_DISPLAY_KEYQ_SIZE);
        assert_eq!(stats.beeps.get(), 2);
    }

    #[test]
    fn test_process_keys_stops_at_aid() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(input_field(0, 0, 0, 5));
        for key in [b'A' as i32, K_ENTER, b'B' as i32] {
            display.queue_key(key);
        }
        assert!(display.process_keys());
        assert_eq!(display.take_aid_requests(), vec![AID_ENTER]);
        assert_eq!(display.queued_keys(), 1);
        assert_eq!(field_text(&display, 0), "A....");
    }

    #[test]
    fn test_function_keys_map_to_aids() {
        let mut display = Display::new();
        display.do_key(K_F1);
        display.do_key(K_F1 + 12);
        display.do_key(K_F24);
        assert_eq!(display.take_aid_requests(), vec![0x31, 0xB1, 0xBC]);
    }

    #[test]
    fn test_push_and_restore_dbuffer() {
        let mut display = Display::new();
        display.addch(0xC1);
        let id = display.push_dbuffer();
        display.clear_unit_alternate();
        assert_eq!(display.width(), 132);
        display.restore_dbuffer(id).unwrap();
        assert_eq!(display.width(), 80);
        assert_eq!(display.char_at(0, 0), 0xC1);
        assert!(display.restore_dbuffer(id).is_err());
    }

    #[test]
    fn test_erase_region_spans_rows() {
        let mut display = Display::new();
        display.erase_region(2, 70, 3, 5, 1, 80);
        assert_eq!(display.char_at(1, 68), 0);
        assert_eq!(display.char_at(1, 69), 0x40);
        assert_eq!(display.char_at(1, 79), 0x40);
        assert_eq!(display.char_at(2, 4), 0x40);
        assert_eq!(display.char_at(2, 5), 0);
    }

    #[test]
    fn test_wordwrap_write_moves_word_down() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(wordwrap_field(0, 0, Continuation::First, true));
        display.dbuffer_mut().add_field(wordwrap_field(0, 1, Continuation::Last, false));
        display.set_cursor(0, 0);
        let text = CharMap::cp037().str_to_remote("HELLO WORLD");
        display.wordwrap_write(&text);
        assert_eq!(field_text(&display, 0), "HELLO ..");
        assert_eq!(field_text(&display, 1), "WORLD...");
    }

    #[test]
    fn test_wordwrap_delete_pulls_word_up() {
        let mut display = Display::new();
        display.dbuffer_mut().add_field(wordwrap_field(0, 0, Continuation::First, true));
        display.dbuffer_mut().add_field(wordwrap_field(0, 1, Continuation::Last, false));
        let map = CharMap::cp037();
        display.set_cursor(0, 0);
        display.wordwrap_write(&map.str_to_remote("AAAA BB CC"));
        assert_eq!(field_text(&display, 0), "AAAA BB ");
        assert_eq!(field_text(&display, 1), "CC......");

        // deleting two characters lets CC join the first line
        display.set_cursor(0, 0);
        display.do_key(K_DELETE);
        display.do_key(K_DELETE);
        assert_eq!(field_text(&display, 0), "AA BB CC");
        assert_eq!(field_text(&display, 1), "........");
        assert_eq!((display.cursor_y(), display.cursor_x()), (0, 0));
    }

    #[test]
    fn test_strpccmd_detection() {
        let mut display = Display::new();
        display.allow_strpccmd = true;
        let map = CharMap::cp037();
        let header = [0x27, 0x80, 0xFC, 0xD7, 0xC3, 0xD6, 0x40, 0, 0, 0, 0, 0x01];
        for (col, &b) in header.iter().enumerate() {
            display.dbuffer_mut().set_char_at(0, col, b);
        }
        let mut cmd = map.str_to_remote("NOTEPAD");
        cmd.resize(123, 0x40);
        for (i, &b) in cmd.iter().enumerate() {
            let pos = 12 + i;
            display.dbuffer_mut().set_char_at(pos / 80, pos % 80, b);
        }
        display.update();
        assert_eq!(
            display.take_pc_command(),
            Some(PcCommand { command: "NOTEPAD".to_string(), wait: false })
        );
        assert_eq!(display.char_at(0, 1), 0x00);
        assert_eq!(display.take_aid_requests(), vec![AID_ENTER]);
    }
}
