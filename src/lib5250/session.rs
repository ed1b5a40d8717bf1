//! Session: the 5250 protocol engine
//!
//! A `Session` pulls records off a `Stream`, decodes the commands and
//! orders they carry into its `Display`, and answers READ commands, AID
//! keys and queries with outbound records. Malformed input the host can
//! recover from is answered with a negative response and the rest of the
//! record is dropped; the session carries on. An undecodable order or an
//! unknown record opcode is returned to the caller as an error.

use std::fmt;
use std::time::Duration;

use super::buffer::ByteBuffer;
use super::codes::*;
use super::display::{
    Display, TN5250_DISPLAY_IND_INSERT, TN5250_DISPLAY_IND_MESSAGE_WAITING, TN5250_DISPLAY_IND_X_CLOCK,
    TN5250_DISPLAY_IND_X_SYSTEM,
};
use super::field::{Field, FieldControls, FCW_CONTINUED_LAST, FCW_WORDWRAP};
use super::gui::{MenuItem, Menubar, Scrollbar, Window, WindowBorder};
use super::record::Record;
use super::telnet::{Stream, StreamEvent, StreamHeader};
use super::terminal::Terminal;
use crate::config::SessionConfig;
use crate::error::{ProtocolError, Result, TN5250Error};

/// Minor structure type of a selection field choice
const MINOR_CHOICE_TEXT: u8 = 0x10;
/// Minor structure types of a Create Window structured field
const MINOR_WINDOW_BORDER: u8 = 0x01;
const MINOR_WINDOW_TITLE: u8 = 0x10;

/// Query reply body; the length byte at offset 4 says how much is sent.
const QUERY_REPLY_SIZE: usize = 67;

/// The CC1 byte of WTD and READ commands, decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ControlCode1 {
    lock_keyboard: bool,
    reset_nonbypass_mdt: bool,
    reset_all_mdt: bool,
    null_nonbypass_mdt: bool,
    null_nonbypass: bool,
}

impl ControlCode1 {
    /// The top three bits pick one of seven combinations.
    fn decode(cc1: u8) -> Self {
        let locked = Self { lock_keyboard: true, ..Self::default() };
        match cc1 & CC1_MASK {
            0x00 => Self::default(),
            0x40 => Self { reset_nonbypass_mdt: true, ..locked },
            0x60 => Self { reset_all_mdt: true, ..locked },
            0x80 => Self { null_nonbypass_mdt: true, ..locked },
            0xA0 => Self { reset_nonbypass_mdt: true, null_nonbypass: true, ..locked },
            0xC0 => Self { reset_nonbypass_mdt: true, null_nonbypass_mdt: true, ..locked },
            0xE0 => Self { reset_all_mdt: true, null_nonbypass: true, ..locked },
            _ => locked,
        }
    }
}

/// Keys honoured while the keyboard is locked
fn bypasses_lock(key: i32) -> bool {
    matches!(key, K_SYSREQ | K_ATTENTION | K_PRINT)
}

/// Device type and model from a terminal type such as `IBM-3179-2`.
/// A missing model reads as 1.
fn device_type_and_model(term: &str) -> (u32, u32) {
    let leading = |s: &str| -> u32 {
        let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().unwrap_or(0)
    };
    let mut parts = term.splitn(3, '-').skip(1);
    let dev_type = parts.next().map_or(0, leading);
    let model = parts.next().map_or(1, leading);
    (dev_type, model)
}

pub struct Session<S: Stream> {
    stream: S,
    display: Display,
    config: SessionConfig,
    record: Record,
    /// The READ command waiting for an AID key, 0 when none
    read_opcode: u8,
    invited: bool,
    /// Set by a word-wrap FCW and carried to the end of its continued group
    wordwrap_sticky: bool,
}

impl<S: Stream> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("display", &self.display)
            .field("read_opcode", &self.read_opcode)
            .field("invited", &self.invited)
            .finish_non_exhaustive()
    }
}

impl<S: Stream> Session<S> {
    pub fn new(stream: S, config: SessionConfig) -> Result<Self> {
        let mut display = Display::new();
        display.config(&config)?;
        Ok(Self {
            stream,
            display,
            config,
            record: Record::new(),
            read_opcode: 0,
            invited: true,
            wordwrap_sticky: false,
        })
    }

    pub fn set_terminal(&mut self, terminal: Box<dyn Terminal>) -> Result<()> {
        self.display.set_terminal(terminal)
    }

    pub fn connect(&mut self) -> Result<()> {
        self.stream.connect()
    }

    pub fn disconnect(&mut self) {
        self.stream.disconnect();
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut Display {
        &mut self.display
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn read_opcode(&self) -> u8 {
        self.read_opcode
    }

    pub fn invited(&self) -> bool {
        self.invited
    }

    /// Run until the stream closes.
    pub fn main_loop(&mut self) -> Result<()> {
        while self.poll()? {}
        log::debug!("stream closed, leaving the main loop");
        Ok(())
    }

    /// Wait for one stream event and handle it, then apply queued keys.
    /// Returns false once the stream is closed.
    pub fn poll(&mut self) -> Result<bool> {
        let timeout = Duration::from_millis(self.config.get_int_or("timeout", 100).max(0) as u64);
        match self.stream.wait_event(timeout)? {
            StreamEvent::Closed => return Ok(false),
            StreamEvent::Data => {
                match self.stream.handle_receive() {
                    Ok(_) => {}
                    Err(e) if e.is_disconnect() => return Ok(false),
                    Err(e) => return Err(e),
                }
                while let Some(record) = self.stream.get_record() {
                    self.handle_record(record)?;
                }
            }
            StreamEvent::Key(key) => self.display.queue_key(key),
            StreamEvent::Idle => {}
        }
        self.display.pull_terminal_keys();
        self.do_keys()?;
        Ok(true)
    }

    /// Apply type-ahead and answer the AID keys it raises. While the
    /// keyboard is locked only SysReq, Attention and Print get through,
    /// ahead of anything queued; other keys wait until the host unlocks it.
    pub fn do_keys(&mut self) -> Result<()> {
        loop {
            self.handle_aid_requests()?;
            let Some(key) = self.display.peek_key() else {
                return Ok(());
            };
            if self.display.keystate() == TN5250_KEYSTATE_LOCKED && !bypasses_lock(key) {
                let Some(key) = self.display.take_queued_key(bypasses_lock) else {
                    return Ok(());
                };
                self.display.do_key(key);
                self.display.update();
                continue;
            }
            self.display.process_keys();
        }
    }

    fn handle_aid_requests(&mut self) -> Result<()> {
        for aid in self.display.take_aid_requests() {
            if self.read_opcode != 0 || aid < 0 {
                self.handle_aidkey(aid)?;
            } else {
                log::debug!("no read pending, AID 0x{:02X} dropped", aid);
            }
        }
        Ok(())
    }

    /// Answer an AID key.
    pub fn handle_aidkey(&mut self, aid: i32) -> Result<()> {
        log::debug!("handling AID 0x{:02X}", aid);
        match aid {
            AID_PRINT | AID_RECORD_BS => {
                let data = [self.display.cursor_y() as u8 + 1, self.display.cursor_x() as u8 + 1, aid as u8];
                self.send(H_NONE, OPCODE_NO_OP, &data)
            }
            AID_SYSREQ | AID_ATTN => {
                self.lock_keyboard();
                let flags = if aid == AID_SYSREQ { H_SRQ } else { H_ATN };
                self.send(flags, OPCODE_NO_OP, &[])?;
                self.display.indicator_clear(TN5250_DISPLAY_IND_X_SYSTEM);
                if self.display.keystate() == TN5250_KEYSTATE_LOCKED {
                    self.display.set_keystate(TN5250_KEYSTATE_UNLOCKED);
                }
                Ok(())
            }
            AID_TESTREQ => self.send(H_TRQ, OPCODE_NO_OP, &[]),
            AID_HELP if self.display.keystate() == TN5250_KEYSTATE_PREHELP => {
                let code = self.display.key_src();
                self.send(H_HLP, OPCODE_NO_OP, &code.to_be_bytes())?;
                self.display.set_keystate(TN5250_KEYSTATE_POSTHELP);
                Ok(())
            }
            _ => self.send_fields(aid),
        }
    }

    /// Decode one inbound record into the display.
    pub fn handle_record(&mut self, record: Record) -> Result<()> {
        self.record = record;
        log::trace!("received record:\n{}", self.record.dump());
        self.record.skip_header()?;

        let opcode = self.record.opcode();
        log::debug!("record opcode 0x{:02X}", opcode);
        match opcode {
            OPCODE_PUT_GET | OPCODE_INVITE => {
                self.invited = true;
                self.display.indicator_clear(TN5250_DISPLAY_IND_X_CLOCK);
            }
            OPCODE_OUTPUT_ONLY => {
                // The host answers a System Request with two extra bytes
                if self.record.flags() & H_SRQ != 0 {
                    self.record.skip(2);
                }
            }
            OPCODE_CANCEL_INVITE => {
                self.display.indicator_set(TN5250_DISPLAY_IND_X_CLOCK);
                self.send(H_NONE, OPCODE_CANCEL_INVITE, &[])?;
                self.invited = false;
            }
            OPCODE_MESSAGE_ON => {
                self.display.indicator_set(TN5250_DISPLAY_IND_MESSAGE_WAITING);
                self.display.beep();
            }
            OPCODE_MESSAGE_OFF => self.display.indicator_clear(TN5250_DISPLAY_IND_MESSAGE_WAITING),
            OPCODE_NO_OP | OPCODE_SAVE_SCR | OPCODE_RESTORE_SCR | OPCODE_READ_IMMED | OPCODE_READ_SCR => {}
            _ => return Err(ProtocolError::UnknownOpcode { opcode }.into()),
        }

        if !self.record.is_chain_end() {
            self.process_stream()?;
        }
        self.display.update();
        Ok(())
    }

    fn process_stream(&mut self) -> Result<()> {
        while let Some(b) = self.record.next_byte() {
            if b != ESC {
                log::warn!("expected an escape, got 0x{:02X}; skipping the rest of the record", b);
                self.record.skip_to_end();
                break;
            }
            let cmd = self.record.get_byte()?;
            log::debug!("command 0x{:02X}", cmd);
            match cmd {
                CMD_CLEAR_UNIT => self.clear_unit(),
                CMD_CLEAR_UNIT_ALTERNATE => self.clear_unit_alternate()?,
                CMD_CLEAR_FORMAT_TABLE => self.clear_format_table(),
                CMD_WRITE_TO_DISPLAY => self.write_to_display()?,
                CMD_WRITE_ERROR_CODE | CMD_WRITE_ERROR_CODE_WINDOW => self.write_error_code(cmd)?,
                CMD_READ_INPUT_FIELDS | CMD_READ_MDT_FIELDS | CMD_READ_MDT_FIELDS_ALT => self.read_command(cmd)?,
                CMD_READ_SCREEN_IMMEDIATE => self.read_screen_immediate()?,
                CMD_READ_SCREEN_EXTENDED
                | CMD_READ_SCREEN_PRINT
                | CMD_READ_SCREEN_PRINT_EXTENDED
                | CMD_READ_SCREEN_PRINT_GRID
                | CMD_READ_SCREEN_PRINT_EXT_GRID => log::debug!("read screen variant 0x{:02X} not supported", cmd),
                CMD_READ_IMMEDIATE => self.read_immediate()?,
                CMD_READ_IMMEDIATE_ALT => log::debug!("read immediate alternate ignored"),
                CMD_SAVE_SCREEN => self.save_screen()?,
                CMD_SAVE_PARTIAL_SCREEN => {
                    let params = self.record.get_bytes(5)?;
                    log::debug!("save partial screen {:02X?}", params);
                    self.save_screen()?;
                }
                CMD_RESTORE_SCREEN | CMD_RESTORE_PARTIAL_SCREEN => {
                    log::debug!("restore screen: the write to display that follows redraws it")
                }
                CMD_ROLL => self.roll()?,
                CMD_WRITE_STRUCTURED_FIELD => self.write_structured_field()?,
                CMD_UNDOCUMENTED_0A => log::debug!("command 0x0A ignored"),
                _ => self.send_error(NR_INVALID_COMMAND)?,
            }
        }
        Ok(())
    }

    fn send(&mut self, flags: u8, opcode: u8, data: &[u8]) -> Result<()> {
        self.stream.send_packet(StreamHeader::new(FLOW_DISPLAY, flags, opcode), data)
    }

    /// Report a negative response and drop the rest of the record.
    fn send_error(&mut self, code: u32) -> Result<()> {
        let err = TN5250Error::from(ProtocolError::NegativeResponse { code });
        log::warn!("{}", err);
        self.send(H_ERR, OPCODE_NO_OP, &code.to_be_bytes())?;
        self.record.skip_to_end();
        Ok(())
    }

    /// X SYSTEM on; an unlocked keyboard becomes locked, error states stay.
    fn lock_keyboard(&mut self) {
        self.display.indicator_set(TN5250_DISPLAY_IND_X_SYSTEM);
        if self.display.keystate() == TN5250_KEYSTATE_UNLOCKED {
            self.display.set_keystate(TN5250_KEYSTATE_LOCKED);
        }
    }

    // ===== clear commands =====

    fn clear_unit(&mut self) {
        self.destroy_gui_constructs();
        self.display.clear_unit();
        self.read_opcode = 0;
    }

    fn clear_unit_alternate(&mut self) -> Result<()> {
        let param = self.record.get_byte()?;
        if param != 0x00 && param != 0x80 {
            return self.send_error(NR_CLEAR_UNIT_ALTERNATE);
        }
        self.destroy_gui_constructs();
        self.display.clear_unit_alternate();
        self.read_opcode = 0;
        Ok(())
    }

    fn clear_format_table(&mut self) {
        self.display.clear_format_table();
        self.read_opcode = 0;
    }

    fn destroy_windows(&mut self) {
        for window in self.display.dbuffer_mut().take_windows() {
            if let Some(term) = self.display.terminal_mut() {
                term.destroy_window(&window);
            }
        }
    }

    fn destroy_scrollbars(&mut self) {
        for scrollbar in self.display.dbuffer_mut().take_scrollbars() {
            if let Some(term) = self.display.terminal_mut() {
                term.destroy_scrollbar(&scrollbar);
            }
        }
    }

    fn destroy_menubars(&mut self) {
        for menubar in self.display.dbuffer_mut().take_menubars() {
            if let Some(term) = self.display.terminal_mut() {
                for item in &menubar.menuitems {
                    term.destroy_menuitem(item);
                }
                term.destroy_menubar(&menubar);
            }
        }
    }

    fn destroy_gui_constructs(&mut self) {
        self.destroy_windows();
        self.destroy_scrollbars();
        self.destroy_menubars();
    }

    // ===== write to display =====

    fn write_to_display(&mut self) -> Result<()> {
        let (old_y, old_x) = (self.display.cursor_y(), self.display.cursor_x());
        let cc1 = self.record.get_byte()?;
        let cc2 = self.record.get_byte()?;
        log::debug!("write to display: CC1 0x{:02X} CC2 0x{:02X}", cc1, cc2);
        self.handle_cc1(cc1);

        let mut moved = None;
        while let Some(order) = self.record.next_byte() {
            match order {
                ESC => {
                    self.record.unget_byte();
                    break;
                }
                WEA => self.write_extended_attribute()?,
                TD => self.transparent_data()?,
                WDSF => self.write_display_structured_field()?,
                MC => {
                    if let Some(pos) = self.move_cursor()? {
                        moved = Some(pos);
                    }
                }
                IC => self.insert_cursor()?,
                EA => self.erase_to_address()?,
                RA => self.repeat_to_address()?,
                SBA => self.set_buffer_address()?,
                SF => self.start_of_field()?,
                SOH => self.start_of_header()?,
                c if self.display.char_map().is_printable(c) => self.display.addch(c),
                _ => return Err(ProtocolError::UnknownOrder { order }.into()),
            }
        }

        let ic_unlock = cc2 & CC2_IC_ULOCK != 0;
        match moved {
            Some((y, x)) if !ic_unlock => self.display.set_cursor(y, x),
            _ if (cc2 & CC2_UNLOCK != 0 && !ic_unlock) || self.record.opcode() == OPCODE_RESTORE_SCR => {
                self.display.set_cursor_home()
            }
            _ => self.display.set_cursor(old_y, old_x),
        }
        self.handle_cc2(cc2);
        Ok(())
    }

    fn handle_cc1(&mut self, cc1: u8) {
        let cc = ControlCode1::decode(cc1);
        if cc.lock_keyboard {
            // Error states too
            self.display.indicator_set(TN5250_DISPLAY_IND_X_SYSTEM);
            self.display.set_keystate(TN5250_KEYSTATE_LOCKED);
        }
        for id in 0..self.display.dbuffer().field_count() {
            let Some(field) = self.display.dbuffer().field(id) else {
                continue;
            };
            let (bypass, modified) = (field.is_bypass(), field.is_modified());
            if !bypass && ((cc.null_nonbypass_mdt && modified) || cc.null_nonbypass) {
                self.display.dbuffer_mut().field_data_mut(id).fill(0);
            }
            if cc.reset_all_mdt || (cc.reset_nonbypass_mdt && !bypass) {
                if let Some(field) = self.display.dbuffer_mut().field_mut(id) {
                    field.set_modified(false);
                }
            }
        }
    }

    fn handle_cc2(&mut self, cc2: u8) {
        if cc2 & CC2_MESSAGE_ON != 0 {
            self.display.indicator_set(TN5250_DISPLAY_IND_MESSAGE_WAITING);
        } else if cc2 & CC2_MESSAGE_OFF != 0 {
            self.display.indicator_clear(TN5250_DISPLAY_IND_MESSAGE_WAITING);
        }
        if cc2 & CC2_ALARM != 0 {
            self.display.beep();
        }
        if cc2 & CC2_UNLOCK != 0 {
            self.display.indicator_clear(TN5250_DISPLAY_IND_X_SYSTEM);
            if self.display.keystate() == TN5250_KEYSTATE_LOCKED {
                self.display.set_keystate(TN5250_KEYSTATE_UNLOCKED);
            }
        }
    }

    /// Row and column as sent on the wire are 1-based; zero or past the
    /// edge is invalid.
    fn valid_address(&self, row: u8, col: u8) -> bool {
        row != 0 && (row as usize) <= self.display.height() && col != 0 && (col as usize) <= self.display.width()
    }

    fn set_buffer_address(&mut self) -> Result<()> {
        let row = self.record.get_byte()?;
        let col = self.record.get_byte()?;
        log::trace!("SBA {} {}", row, col);
        if !self.valid_address(row, col) {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        self.display.set_cursor(row as usize - 1, col as usize - 1);
        Ok(())
    }

    fn insert_cursor(&mut self) -> Result<()> {
        let row = self.record.get_byte()?;
        let col = self.record.get_byte()?;
        log::trace!("IC {} {}", row, col);
        if !self.valid_address(row, col) {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        self.display.set_pending_insert(row as usize - 1, col as usize - 1);
        Ok(())
    }

    /// Returns the 0-based position the cursor goes to once the WTD ends.
    fn move_cursor(&mut self) -> Result<Option<(usize, usize)>> {
        let row = self.record.get_byte()?;
        let col = self.record.get_byte()?;
        log::trace!("MC {} {}", row, col);
        if !self.valid_address(row, col) {
            self.send_error(NR_INVALID_ROW_COL_ADDR)?;
            return Ok(None);
        }
        Ok(Some((row as usize - 1, col as usize - 1)))
    }

    fn write_extended_attribute(&mut self) -> Result<()> {
        let attr_type = self.record.get_byte()?;
        let value = self.record.get_byte()?;
        log::debug!("WEA type 0x{:02X} value 0x{:02X} ignored", attr_type, value);
        if !matches!(attr_type, 0x01 | 0x03 | 0x05) {
            return self.send_error(NR_INVALID_EXT_ATTR_TYPE);
        }
        Ok(())
    }

    fn transparent_data(&mut self) -> Result<()> {
        let length = self.record.get_u16()? as usize;
        let (w, h) = (self.display.width(), self.display.height());
        let cursor = self.display.cursor_y() * w + self.display.cursor_x();
        log::trace!("TD {} bytes", length);
        if cursor + length > w * h {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        for c in self.record.get_bytes(length)? {
            self.display.addch(c);
        }
        Ok(())
    }

    fn repeat_to_address(&mut self) -> Result<()> {
        let row = self.record.get_byte()?;
        let col = self.record.get_byte()?;
        let c = self.record.get_byte()?;
        log::trace!("RA {} {} 0x{:02X}", row, col, c);
        if !self.valid_address(row, col) {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        let w = self.display.width();
        let here = self.display.cursor_y() * w + self.display.cursor_x();
        let target = (row as usize - 1) * w + (col as usize - 1);
        if target < here {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        self.display.repeat_char(c, target - here + 1);
        Ok(())
    }

    /// Only the "erase everything" form (attribute type 0xFF) clears cells.
    fn erase_to_address(&mut self) -> Result<()> {
        let (cur_y, cur_x) = (self.display.cursor_y() + 1, self.display.cursor_x() + 1);
        let row = self.record.get_byte()?;
        let col = self.record.get_byte()?;
        let length = self.record.get_byte()? as usize;
        log::trace!("EA {} {} length {}", row, col, length);
        if !self.valid_address(row, col) {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        let (row, col) = (row as usize, col as usize);
        let (w, h) = (self.display.width(), self.display.height());
        if (row - 1) * w + col < (cur_y - 1) * w + cur_x || !(2..=5).contains(&length) {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        let attrs = self.record.get_bytes(length - 1)?;
        if attrs.last() == Some(&0xFF) {
            self.display.erase_region(cur_y, cur_x, row, col, 1, w);
        }
        // Continue at the cell after the target address
        let next = ((row - 1) * w + col) % (w * h);
        self.display.set_cursor(next / w, next % w);
        Ok(())
    }

    fn start_of_header(&mut self) -> Result<()> {
        self.display.dbuffer_mut().clear_table();
        self.display.clear_pending_insert();
        self.lock_keyboard();

        let length = self.record.get_byte()? as usize;
        log::trace!("SOH length {}", length);
        if length > 7 {
            return self.send_error(NR_INVALID_SOH_LENGTH);
        }
        let header = self.record.get_bytes(length)?;
        self.display.dbuffer_mut().set_header_data(&header);
        Ok(())
    }

    fn start_of_field(&mut self) -> Result<()> {
        let first = self.record.get_byte()?;
        let input = first & 0xE0 != 0x20;
        let mut ffw = 0u16;
        let mut controls = FieldControls::default();

        let attribute = if input {
            self.lock_keyboard();
            ffw = u16::from_be_bytes([first, self.record.get_byte()?]);
            let mut ends_wordwrap = false;
            let mut c = self.record.get_byte()?;
            while c & 0xE0 != 0x20 {
                let fcw = u16::from_be_bytes([c, self.record.get_byte()?]);
                if !controls.apply(fcw) {
                    log::debug!("unknown FCW 0x{:04X}", fcw);
                }
                match fcw {
                    FCW_WORDWRAP => self.wordwrap_sticky = true,
                    FCW_CONTINUED_LAST => ends_wordwrap = true,
                    _ => {}
                }
                c = self.record.get_byte()?;
            }
            controls.wordwrap = self.wordwrap_sticky;
            if ends_wordwrap {
                self.wordwrap_sticky = false;
            }
            c
        } else {
            first
        };

        self.display.addch(attribute);
        let length = self.record.get_u16()? as usize;
        let (y, x) = (self.display.cursor_y(), self.display.cursor_x());
        let (w, h) = (self.display.width(), self.display.height());
        log::trace!("SF at ({}, {}) FFW 0x{:04X} attr 0x{:02X} length {}", y, x, ffw, attribute, length);
        if y * w + x + length > w * h {
            return self.send_error(NR_INVALID_ROW_COL_ADDR);
        }
        if !input {
            return Ok(());
        }

        match self.display.field_at(y, x) {
            Some(id) => match self.display.dbuffer_mut().field_mut(id) {
                Some(field) if field.start_row == y && field.start_col == x => {
                    field.ffw = ffw;
                    field.attribute = attribute;
                }
                _ => log::debug!("SF inside field {} left out of the format table", id),
            },
            None => {
                let field = Field::new(ffw, attribute, y, x, length, w).with_controls(controls);
                self.display.dbuffer_mut().add_field(field);
            }
        }

        // Normal attribute after the field
        let next = (y * w + x + length.max(1)) % (w * h);
        self.display.set_cursor(next / w, next % w);
        self.display.addch(ATTR_5250_NORMAL);
        self.display.set_cursor(y, x);
        Ok(())
    }

    // ===== write error code =====

    fn write_error_code(&mut self, cmd: u8) -> Result<()> {
        if cmd == CMD_WRITE_ERROR_CODE_WINDOW {
            let window = self.record.get_bytes(2)?;
            log::debug!("write error code to window, columns {:?}", window);
        }
        let mut end = (self.display.cursor_y(), self.display.cursor_x());
        self.display.save_msg_line();
        let width = self.display.width();
        let mut msg = Vec::with_capacity(width);

        while let Some(c) = self.record.next_byte() {
            match c {
                ESC => {
                    self.record.unget_byte();
                    break;
                }
                IC => {
                    let row = self.record.get_byte()? as usize;
                    let col = self.record.get_byte()? as usize;
                    end = (row.saturating_sub(1), col.saturating_sub(1));
                }
                c if self.display.char_map().is_printable(c) => {
                    if msg.len() < width {
                        msg.push(c);
                    }
                }
                _ => return Err(ProtocolError::UnknownOrder { order: c }.into()),
            }
        }
        log::debug!("error message: {}", self.display.char_map().remote_to_string(&msg));

        self.display.set_msg_line(&msg);
        self.display.set_cursor(end.0, end.1);
        self.display.set_keystate(TN5250_KEYSTATE_POSTHELP);
        self.display.inhibit();
        Ok(())
    }

    // ===== read commands =====

    fn read_command(&mut self, cmd: u8) -> Result<()> {
        let cc1 = self.record.get_byte()?;
        self.handle_cc1(cc1);
        let cc2 = self.record.get_byte()?;
        self.handle_cc2(cc2);
        log::debug!("read command 0x{:02X}: CC1 0x{:02X} CC2 0x{:02X}", cmd, cc1, cc2);

        self.display.indicator_clear(TN5250_DISPLAY_IND_X_SYSTEM | TN5250_DISPLAY_IND_X_CLOCK);
        if self.display.keystate() == TN5250_KEYSTATE_LOCKED {
            self.display.uninhibit();
            self.display.set_keystate(TN5250_KEYSTATE_UNLOCKED);
        }
        self.read_opcode = cmd;
        Ok(())
    }

    fn read_screen_immediate(&mut self) -> Result<()> {
        let grid = self.display.dbuffer().data().to_vec();
        log::debug!("read screen immediate: {} bytes", grid.len());
        self.send(H_NONE, OPCODE_NO_OP, &grid)
    }

    fn read_immediate(&mut self) -> Result<()> {
        let pending = self.read_opcode;
        self.read_opcode = CMD_READ_IMMEDIATE;
        self.send_fields(0)?;
        self.read_opcode = pending;
        Ok(())
    }

    /// Answer the pending READ with the cursor, the AID and field data,
    /// then lock the keyboard until the host replies.
    fn send_fields(&mut self, aid: i32) -> Result<()> {
        let mut buffer = ByteBuffer::new();
        buffer.append_byte(self.display.cursor_y() as u8 + 1);
        buffer.append_byte(self.display.cursor_x() as u8 + 1);
        buffer.append_byte(aid as u8);

        let dbuffer = self.display.dbuffer();
        let all = || dbuffer.fields().iter().map(|f| f.id).collect::<Vec<_>>();
        let ids = match self.read_opcode {
            CMD_READ_INPUT_FIELDS if dbuffer.master_mdt() && dbuffer.send_data_for_aid_key(aid) => all(),
            CMD_READ_IMMEDIATE if dbuffer.master_mdt() => all(),
            CMD_READ_INPUT_FIELDS | CMD_READ_IMMEDIATE => Vec::new(),
            CMD_READ_MDT_FIELDS | CMD_READ_MDT_FIELDS_ALT | CMD_READ_IMMEDIATE_ALT => {
                if dbuffer.send_data_for_aid_key(aid) {
                    dbuffer.fields().iter().filter(|f| f.is_modified()).map(|f| f.id).collect()
                } else {
                    Vec::new()
                }
            }
            other => {
                log::warn!("sending fields with unexpected read opcode 0x{:02X}", other);
                Vec::new()
            }
        };
        for id in ids {
            self.append_field(&mut buffer, id);
        }
        buffer.log_hex("fields>");

        self.read_opcode = 0;
        self.display.indicator_set(TN5250_DISPLAY_IND_X_SYSTEM);
        self.display.set_keystate(TN5250_KEYSTATE_LOCKED);
        self.display.indicator_clear(TN5250_DISPLAY_IND_INSERT);
        self.display.update();
        self.send(H_NONE, OPCODE_PUT_GET, buffer.data())
    }

    /// Serialize one field for the pending READ. A continued group goes
    /// out once, as its first field, carrying the text of every member.
    fn append_field(&self, buffer: &mut ByteBuffer, id: usize) {
        let dbuffer = self.display.dbuffer();
        let Some(field) = dbuffer.field(id) else {
            return;
        };
        if field.is_continued_middle() || field.is_continued_last() {
            return;
        }
        let data: Vec<u8> = if field.is_continued_first() {
            dbuffer.continued_group(id).iter().flat_map(|&g| dbuffer.field_data(g).iter().copied()).collect()
        } else {
            dbuffer.field_data(id).to_vec()
        };
        let map = self.display.char_map();
        let blank = |c: u8| if c == 0 { 0x40 } else { c };
        log::trace!("sending field {} ({} bytes)", id, data.len());

        match self.read_opcode {
            CMD_READ_INPUT_FIELDS | CMD_READ_IMMEDIATE => {
                let size = data.len();
                if field.is_signed_num() && size >= 2 {
                    data[..size - 1].iter().for_each(|&c| buffer.append_byte(blank(c)));
                    let c = data[size - 2];
                    let negative = map.to_local(data[size - 1]) == b'-';
                    buffer.append_byte(if negative { 0xD0 | (c & 0x0F) } else { c });
                } else {
                    data.iter().for_each(|&c| buffer.append_byte(blank(c)));
                }
            }
            _ => {
                buffer.append_byte(SBA);
                buffer.append_byte(field.start_row as u8 + 1);
                buffer.append_byte(field.start_col as u8 + 1);

                // The sign position is never sent; a minus zones the last digit
                let mut size = data.len();
                let mut last = data.last().copied().unwrap_or(0);
                if field.is_signed_num() {
                    size = size.saturating_sub(1);
                    last = if size > 0 { data[size - 1] } else { 0 };
                    if size > 1 && data[size] == map.to_remote(b'-') && map.to_local(last).is_ascii_digit() {
                        last = 0xD0 | (last & 0x0F);
                    }
                }
                while size > 0 && data[size - 1] == 0 {
                    size -= 1;
                    last = if size > 0 { data[size - 1] } else { 0 };
                }

                // Read MDT Fields blanks nulls, the alternate forms keep them
                let translate = |c: u8| if self.read_opcode == CMD_READ_MDT_FIELDS { blank(c) } else { c };
                if size > 0 {
                    data[..size - 1].iter().for_each(|&c| buffer.append_byte(translate(c)));
                    buffer.append_byte(translate(last));
                }
            }
        }
    }

    // ===== save and roll =====

    fn save_screen(&mut self) -> Result<()> {
        let mut data = self.display.make_wtd_data();
        if self.read_opcode != 0 {
            data.append_byte(ESC);
            data.append_byte(self.read_opcode);
            data.append_byte(0x00);
            data.append_byte(0x00);
        }
        log::debug!("save screen: {} bytes", data.len());
        self.send(H_NONE, OPCODE_SAVE_SCR, data.data())
    }

    fn roll(&mut self) -> Result<()> {
        let direction = self.record.get_byte()?;
        let top = self.record.get_byte()? as usize;
        let bottom = self.record.get_byte()? as usize;
        let mut lines = (direction & 0x1F) as i32;
        if direction & 0x80 == 0 {
            lines = -lines;
        }
        log::debug!("roll rows {}..={} by {}", top, bottom, lines);
        if lines == 0 {
            return Ok(());
        }
        self.display.roll(top.saturating_sub(1), bottom.saturating_sub(1), lines);
        Ok(())
    }

    // ===== structured fields =====

    fn write_structured_field(&mut self) -> Result<()> {
        let length = self.record.get_u16()? as usize;
        let class = self.record.get_byte()?;
        let sf_type = self.record.get_byte()?;
        let flags = self.record.get_byte()?;
        log::debug!(
            "write structured field: length {} class 0x{:02X} type 0x{:02X} flags 0x{:02X}",
            length,
            class,
            sf_type,
            flags
        );
        if class != SF_CLASS_5250 {
            return self.send_error(NR_INVALID_SF_CLASS_TYPE);
        }
        match sf_type {
            SF_5250_QUERY | SF_5250_QUERY_STATION_STATE => {
                self.record.skip(length.saturating_sub(5));
                self.query_reply()
            }
            DEFINE_AUDIT_WINDOW_TABLE..=DEFINE_FAKE_DP_CMD_KEY_FUNC | PASS_THROUGH => {
                log::debug!("structured field type 0x{:02X} acknowledged", sf_type);
                self.record.skip(length.saturating_sub(5));
                Ok(())
            }
            _ => self.send_error(NR_INVALID_SF_CLASS_TYPE),
        }
    }

    /// Send the 5250 Query Reply describing this workstation.
    fn query_reply(&mut self) -> Result<()> {
        let enhanced = self.display.terminal().is_some_and(|t| t.enhanced()) && self.config.get_bool_or("enhanced", false);
        let (dev_type, model) = device_type_and_model(&self.config.terminal_type());
        log::debug!("query reply: device {} model {} enhanced {}", dev_type, model, enhanced);
        let map = self.display.char_map();

        let mut temp = [0u8; QUERY_REPLY_SIZE];
        temp[2] = 0x88; // inbound WSF AID
        temp[4] = if enhanced { 0x40 } else { 0x3A };
        temp[5..8].copy_from_slice(&[SF_CLASS_5250, SF_5250_QUERY, 0x80]);
        temp[8..10].copy_from_slice(&[0x06, 0x00]); // controller hardware class
        temp[10..13].copy_from_slice(&[0x01, 0x01, 0x00]); // code level
        temp[29] = 0x01; // display emulation
        for (i, b) in format!("{:04}", dev_type % 10_000).bytes().enumerate() {
            temp[30 + i] = map.to_remote(b);
        }
        temp[34] = map.to_remote(0);
        for (i, b) in format!("{:02}", model % 100).bytes().enumerate() {
            temp[35 + i] = map.to_remote(b);
        }
        temp[37] = 0x02; // standard keyboard
        temp[40..44].copy_from_slice(&[0x00, 0x61, 0x50, 0x00]); // serial number
        temp[44..46].copy_from_slice(&[0xFF, 0xFF]); // maximum input fields
        temp[49..51].copy_from_slice(&[0x23, 0x31]); // controller/display capability
        if enhanced {
            temp[53..55].copy_from_slice(&[0x02, 0x80]);
        }

        let size = temp[4] as usize + 3;
        self.send(H_NONE, OPCODE_NO_OP, &temp[..size])
    }

    fn write_display_structured_field(&mut self) -> Result<()> {
        let length = self.record.get_u16()? as usize;
        let class = self.record.get_byte()?;
        let sf_type = self.record.get_byte()?;
        log::debug!("WDSF: length {} class 0x{:02X} type 0x{:02X}", length, class, sf_type);
        if class != SF_CLASS_5250 {
            return self.send_error(NR_INVALID_SF_CLASS_TYPE);
        }
        let length = length.saturating_sub(4);
        let end = self.record.position() + length;

        match sf_type {
            DEFINE_SELECTION_FIELD => self.define_selection_field(length)?,
            CREATE_WINDOW => self.create_window(length)?,
            DEFINE_SCROLL_BAR_FIELD => self.define_scrollbar(length)?,
            WRITE_DATA => self.write_data(length)?,
            REM_GUI_SEL_FIELD => self.destroy_menubars(),
            REM_GUI_WINDOW => self.remove_gui_window(),
            REM_ALL_GUI_CONSTRUCTS => self.destroy_gui_constructs(),
            UNREST_WIN_CURS_MOVE
            | PROGRAMMABLE_MOUSE_BUT
            | REM_GUI_SCROLL_BAR_FIELD
            | DRAW_ERASE_GRID_LINES
            | CLEAR_GRID_LINE_BUFFER => log::debug!("WDSF type 0x{:02X} ignored", sf_type),
            _ => return self.send_error(NR_INVALID_SF_CLASS_TYPE),
        }

        let position = self.record.position();
        if position < end {
            self.record.skip(end - position);
        }
        Ok(())
    }

    fn define_selection_field(&mut self, length: usize) -> Result<()> {
        let (cx, cy) = (self.display.cursor_x(), self.display.cursor_y());
        let existing = self.display.dbuffer().menubar_hit_test(cx, cy).cloned();
        let create = existing.is_none();
        let mut menubar = existing.unwrap_or_default();

        menubar.flagbyte1 = self.record.get_byte()?;
        menubar.flagbyte2 = self.record.get_byte()?;
        menubar.restricted_cursor = menubar.flagbyte2 & 0x04 != 0;
        menubar.flagbyte3 = self.record.get_byte()?;
        menubar.menu_type = self.record.get_byte()?;
        self.record.get_bytes(5)?;
        menubar.itemsize = self.record.get_byte()? as usize;
        menubar.height = self.record.get_byte()? as usize;
        menubar.items = self.record.get_byte()? as usize;
        let padding = self.record.get_byte()?;
        let separator = self.record.get_byte()?;
        let selection_char = self.record.get_byte()?;
        let cancel_aid = self.record.get_byte()?;
        log::debug!(
            "selection field type 0x{:02X}: {} choices of {} in {} rows, padding 0x{:02X} separator 0x{:02X} \
             selection 0x{:02X} cancel AID 0x{:02X}",
            menubar.menu_type,
            menubar.items,
            menubar.itemsize,
            menubar.height,
            padding,
            separator,
            selection_char,
            cancel_aid
        );

        let mut remaining = length.saturating_sub(16);
        if remaining == 0 {
            if !create {
                self.store_menubar(menubar);
            }
            return Ok(());
        }
        if create {
            menubar.row = cy;
            menubar.column = cx;
        }

        let mut count = 0;
        while remaining > 0 {
            let minor_len = self.record.get_byte()? as usize;
            let minor_type = self.record.get_byte()?;
            remaining = remaining.saturating_sub(minor_len.max(2));
            let body = minor_len.saturating_sub(2);
            if minor_type == MINOR_CHOICE_TEXT {
                self.define_selection_item(&mut menubar, body, count, create)?;
                count += 1;
            } else {
                log::debug!("selection field minor structure 0x{:02X} skipped", minor_type);
                self.record.skip(body);
            }
        }

        if create {
            let id = self.display.dbuffer_mut().add_menubar(menubar);
            let stored = self.display.dbuffer().menubars().iter().find(|m| m.id == id).cloned();
            if let (Some(stored), Some(term)) = (stored, self.display.terminal_mut()) {
                term.create_menubar(&stored);
                for item in &stored.menuitems {
                    term.create_menuitem(item);
                }
            }
        } else {
            self.store_menubar(menubar);
        }
        Ok(())
    }

    fn store_menubar(&mut self, menubar: Menubar) {
        if let Some(slot) = self.display.dbuffer_mut().menubar_mut(menubar.id) {
            *slot = menubar;
        }
    }

    fn define_selection_item(&mut self, menubar: &mut Menubar, length: usize, count: usize, create: bool) -> Result<()> {
        let mut item = if create {
            MenuItem::new()
        } else {
            menubar.menuitems.iter().find(|i| i.id == count).cloned().unwrap_or_default()
        };
        item.flagbyte1 = self.record.get_byte()?;
        match item.flagbyte1 & 0xC0 {
            0x00 => item.available = true,
            0x40 => {
                item.selected = true;
                item.available = true;
            }
            0x80 => {
                item.selected = false;
                item.available = false;
            }
            _ => log::debug!("reserved choice state"),
        }
        item.flagbyte2 = self.record.get_byte()?;
        item.flagbyte3 = self.record.get_byte()?;
        let mut remaining = length.saturating_sub(3);

        if item.flagbyte3 & 0xE0 == 0 {
            log::debug!("choice minor structure ignored");
            self.record.skip(remaining);
            return Ok(());
        }
        let optional = [
            (item.flagbyte1 & 0x08 != 0, "mnemonic offset"),
            (item.flagbyte1 & 0x04 != 0, "choice AID"),
            (matches!(item.flagbyte1 & 0x03, 0x01 | 0x02), "numeric selection"),
        ];
        for (present, what) in optional {
            if present {
                let value = self.record.get_byte()?;
                remaining = remaining.saturating_sub(1);
                log::trace!("{} 0x{:02X}", what, value);
            }
        }

        let text_len = remaining.min(menubar.itemsize);
        item.text = self.record.get_bytes(text_len)?;
        item.size = text_len + 2;
        self.record.skip(remaining - text_len);
        log::debug!("choice {}: {}", count, self.display.char_map().remote_to_string(&item.text));

        if !create {
            if let Some(slot) = menubar.item_mut(count) {
                *slot = item;
                return Ok(());
            }
        }
        menubar.add_item(item);
        Ok(())
    }

    fn create_window(&mut self, length: usize) -> Result<()> {
        let flags = self.record.get_byte()?;
        self.record.get_bytes(2)?;
        let depth = self.record.get_byte()? as usize;
        let width = self.record.get_byte()? as usize;
        let (cx, cy) = (self.display.cursor_x(), self.display.cursor_y());
        let mut window = Window::new(cy + 1, cx + 1, depth, width);
        log::debug!("create window {}x{} at ({}, {}) flags 0x{:02X}", width, depth, cy, cx, flags);

        let mut remaining = length.saturating_sub(5);
        while remaining > 0 {
            let minor_len = self.record.get_byte()? as usize;
            let minor_type = self.record.get_byte()?;
            remaining = remaining.saturating_sub(minor_len.max(2));
            let body = minor_len.saturating_sub(2);
            match minor_type {
                MINOR_WINDOW_BORDER if body >= 3 => {
                    let mut border = WindowBorder {
                        flags: self.record.get_byte()?,
                        mono_attr: self.record.get_byte()?,
                        color_attr: self.record.get_byte()?,
                        chars: Vec::new(),
                    };
                    let chars = (body - 3).min(8);
                    border.chars = self.record.get_bytes(chars)?;
                    self.record.skip(body - 3 - chars);
                    window.border = Some(border);
                }
                MINOR_WINDOW_TITLE => {
                    let title = self.record.get_bytes(body)?;
                    log::debug!("window title/footer: {}", self.display.char_map().remote_to_string(&title));
                }
                _ => {
                    log::debug!("window minor structure 0x{:02X} skipped", minor_type);
                    self.record.skip(body);
                }
            }
        }

        let (row, column) = (window.row, window.column);
        if self.display.dbuffer().window_match(column, row, width, depth).is_some() {
            log::debug!("window already exists");
        } else {
            let id = self.display.dbuffer_mut().add_window(window);
            let stored = self.display.dbuffer().windows().iter().find(|w| w.id == id).cloned();
            if let (Some(stored), Some(term)) = (stored, self.display.terminal_mut()) {
                term.create_window(&stored);
            }
        }
        self.display.erase_region(row + 1, column + 2, row + depth, column + width + 1, column + 2, column + width + 1);
        Ok(())
    }

    fn define_scrollbar(&mut self, length: usize) -> Result<()> {
        let flags = self.record.get_byte()?;
        self.record.get_byte()?;
        let mut scrollbar = Scrollbar {
            direction: u8::from(flags & 0x80 != 0),
            rowscols: self.record.get_byte()? as u32,
            sliderpos: self.record.get_byte()? as u32,
            ..Scrollbar::default()
        };
        let mut remaining = length.saturating_sub(4);
        if remaining > 0 {
            scrollbar.size = self.record.get_byte()?;
            remaining -= 1;
        }
        self.record.skip(remaining);
        log::debug!(
            "scroll bar: direction {} total {} slider {} size {}",
            scrollbar.direction,
            scrollbar.rowscols,
            scrollbar.sliderpos,
            scrollbar.size
        );

        let id = self.display.dbuffer_mut().add_scrollbar(scrollbar);
        let stored = self.display.dbuffer().scrollbars().iter().find(|s| s.id == id).cloned();
        if let (Some(stored), Some(term)) = (stored, self.display.terminal_mut()) {
            term.create_scrollbar(&stored);
        }
        Ok(())
    }

    /// Remove the window whose border starts at the cursor, and every
    /// scroll bar.
    fn remove_gui_window(&mut self) {
        let (cx, cy) = (self.display.cursor_x(), self.display.cursor_y());
        let id = self.display.dbuffer().window_hit_test(cx + 1, cy + 1).map(|w| w.id);
        if let Some(window) = id.and_then(|id| self.display.dbuffer_mut().remove_window(id)) {
            log::debug!("removing window {}", window.id);
            if let Some(term) = self.display.terminal_mut() {
                term.destroy_window(&window);
            }
        }
        self.destroy_scrollbars();
    }

    fn write_data(&mut self, length: usize) -> Result<()> {
        let flags = self.record.get_byte()?;
        let text = self.record.get_bytes(length.saturating_sub(1))?;
        log::debug!("write data, flags 0x{:02X}: {}", flags, self.display.char_map().remote_to_string(&text));
        if flags & 0x80 != 0 {
            self.display.wordwrap_write(&text);
        }
        Ok(())
    }
}
