//! Write To Display reconstruction
//!
//! Builds the data stream that redraws a display buffer from scratch:
//! the reply to a SAVE SCREEN command, which the host later plays back
//! with RESTORE SCREEN. The stream clears the unit, re-creates the
//! format table with SF orders and writes every cell, compressing runs
//! with RA (or SBA for nulls, since the unit was just cleared). A final
//! IC order carries the cursor position.

use super::buffer::ByteBuffer;
use super::codes::{
    CMD_CLEAR_UNIT, CMD_CLEAR_UNIT_ALTERNATE, CMD_RESTORE_SCREEN, CMD_WRITE_TO_DISPLAY, CREATE_WINDOW,
    DEFINE_SCROLL_BAR_FIELD, DEFINE_SELECTION_FIELD, ESC, IC, RA, SBA, SF, SF_CLASS_5250, SOH, WDSF,
};
use super::dbuffer::DisplayBuffer;
use super::field::Field;
use super::gui::{Menubar, Scrollbar, Window};

/// Runs shorter than this are written out byte by byte
const RA_THRESHOLD: usize = 4;

/// Minor structure type of a selection field choice
const MINOR_CHOICE_TEXT: u8 = 0x10;

/// Choice presentation attributes minor structure written ahead of the
/// choices of every selection field
const CHOICE_PRESENTATION: [u8; 19] = [
    0x13, 0x01, 0xE0, 0x00, 0x21, 0x00, 0x23, 0x00, 0x23, 0x22, 0x20, 0x20, 0x22, 0x20, 0x22, 0x00, 0x20, 0x00, 0x22,
];

/// Converts one display buffer into a Write To Display stream.
pub struct WtdContext<'a> {
    dst: &'a DisplayBuffer,
    out: ByteBuffer,
    /// 1-based insert-cursor address
    ic: (usize, usize),
    ra_count: usize,
    ra_char: u8,
    clear_unit: bool,
}

impl<'a> WtdContext<'a> {
    pub fn new(dst: &'a DisplayBuffer) -> Self {
        Self { dst, out: ByteBuffer::new(), ic: (1, 1), ra_count: 0, ra_char: 0x00, clear_unit: false }
    }

    /// Insert-cursor address written with the IC order, 1-based
    pub fn set_ic(&mut self, y: usize, x: usize) {
        self.ic = (y, x);
    }

    /// Produce the stream.
    pub fn convert(mut self) -> ByteBuffer {
        let dst = self.dst;
        let (width, height) = (dst.width(), dst.height());

        self.putc(ESC);
        self.putc(CMD_RESTORE_SCREEN);
        self.putc(ESC);
        if width != 80 {
            self.putc(CMD_CLEAR_UNIT_ALTERNATE);
            self.putc(0x00);
        } else {
            self.putc(CMD_CLEAR_UNIT);
        }
        self.clear_unit = true;

        self.putc(ESC);
        self.putc(CMD_WRITE_TO_DISPLAY);
        self.putc(0x00); // CC1
        self.putc(0x00); // CC2

        if let Some(header) = dst.header_data() {
            self.putc(SOH);
            self.putc(header.len() as u8);
            for &b in header {
                self.putc(b);
            }
        }

        for scrollbar in dst.scrollbars() {
            self.write_scrollbar(scrollbar);
        }

        let mut menubars_written = vec![false; dst.menubars().len()];
        for y in 0..height {
            for x in 0..width {
                let pos = y * width + x;
                if let Some(window) = dst.window_hit_test(x + 1, y + 1) {
                    self.write_window(window, pos);
                }
                for (i, menubar) in dst.menubars().iter().enumerate() {
                    if !menubars_written[i] && menubar.row == y && menubar.column == x {
                        menubars_written[i] = true;
                        self.write_selection_field(menubar, pos);
                    }
                }

                let c = dst.char_at(y, x);
                match self.peek_field(y, x) {
                    Some(field) => self.write_field(field, c, pos),
                    None => self.ra_putc(c, pos),
                }
            }
        }
        self.ra_flush(width * height);

        // Puts the cursor back where it was when the screen was saved
        self.out.append_byte(IC);
        self.out.append_byte(self.ic.0 as u8);
        self.out.append_byte(self.ic.1 as u8);

        self.out.log_hex("wtd>");
        self.out
    }

    /// The field starting in the cell after (y, x); that cell holds its
    /// attribute.
    fn peek_field(&self, y: usize, x: usize) -> Option<&'a Field> {
        let dst = self.dst;
        let (mut ny, mut nx) = (y, x + 1);
        if nx == dst.width() {
            ny += 1;
            if ny == dst.height() {
                return None;
            }
            nx = 0;
        }
        let field = dst.field(dst.field_yx(ny, nx)?)?;
        (field.start_row == ny && field.start_col == nx).then_some(field)
    }

    /// Append a byte, flushing any pending run first. `pos` is the flat
    /// address of the cell about to be written.
    fn put_at(&mut self, c: u8, pos: usize) {
        self.ra_flush(pos);
        self.out.append_byte(c);
    }

    fn putc(&mut self, c: u8) {
        self.put_at(c, 0);
    }

    fn ra_putc(&mut self, c: u8, pos: usize) {
        if self.ra_char != c {
            self.ra_flush(pos);
        }
        self.ra_char = c;
        self.ra_count += 1;
    }

    /// Emit the pending run, which ends just before the flat address `pos`.
    fn ra_flush(&mut self, pos: usize) {
        if self.ra_count == 0 {
            return;
        }
        let width = self.dst.width();
        let total = width * self.dst.height();

        if self.ra_count <= RA_THRESHOLD && !(self.ra_count == 3 && self.ra_char == 0x00 && self.clear_unit) {
            for _ in 0..self.ra_count {
                self.out.append_byte(self.ra_char);
            }
        } else if self.clear_unit && self.ra_char == 0x00 {
            // Nulls are already there; skip over them
            if pos < total {
                self.out.append_byte(SBA);
                self.out.append_byte((pos / width + 1) as u8);
                self.out.append_byte((pos % width + 1) as u8);
            }
        } else {
            let last = (pos + total - 1) % total;
            self.out.append_byte(RA);
            self.out.append_byte((last / width + 1) as u8);
            self.out.append_byte((last % width + 1) as u8);
            self.out.append_byte(self.ra_char);
        }
        self.ra_count = 0;
    }

    /// SF order for `field`; `attr` is the attribute cell in front of it.
    fn write_field(&mut self, field: &Field, attr: u8, pos: usize) {
        self.put_at(SF, pos);
        if field.ffw != 0 {
            for b in field.ffw.to_be_bytes() {
                self.out.append_byte(b);
            }
        }
        for fcw in field.controls.encode() {
            for b in fcw.to_be_bytes() {
                self.out.append_byte(b);
            }
        }
        // The attribute cell may have been overwritten since the SF arrived
        let attr = if attr & 0xE0 == 0x20 { attr } else { field.attribute };
        self.out.append_byte(attr);
        self.out.append_u16(field.length as u16);
    }

    /// Create Window structured field
    fn write_window(&mut self, window: &Window, pos: usize) {
        let border_len = window.border.as_ref().map_or(0, |b| 5 + b.chars.len());
        self.put_at(WDSF, pos);
        self.out.append_u16((9 + border_len) as u16);
        self.out.append_data(&[SF_CLASS_5250, CREATE_WINDOW, 0x80, 0x00, 0x00]);
        self.out.append_byte(window.height as u8);
        self.out.append_byte(window.width as u8);
        if let Some(border) = &window.border {
            self.out.append_data(&[border_len as u8, 0x01, border.flags, border.mono_attr, border.color_attr]);
            self.out.append_data(&border.chars);
        }
    }

    /// Define Selection Field structured field with one choice text minor
    /// structure per item
    fn write_selection_field(&mut self, menubar: &Menubar, pos: usize) {
        let texts: Vec<&[u8]> = menubar.menuitems.iter().map(|item| item_text(&item.text)).collect();
        let minor_len: usize = texts.iter().map(|t| 5 + t.len()).sum();
        let major_len = 4 + 16 + CHOICE_PRESENTATION.len() + minor_len;

        self.put_at(WDSF, pos);
        self.out.append_u16(major_len as u16);
        self.out.append_data(&[SF_CLASS_5250, DEFINE_SELECTION_FIELD]);
        self.out.append_data(&[menubar.flagbyte1, menubar.flagbyte2, menubar.flagbyte3, menubar.menu_type]);
        self.out.append_data(&[0x00; 5]);
        self.out.append_byte(menubar.itemsize as u8);
        self.out.append_byte(menubar.height as u8);
        self.out.append_byte(menubar.items as u8);
        // padding, separator, selection character, cancel AID
        self.out.append_data(&[0x01, 0x00, 0x00, 0x00]);
        self.out.append_data(&CHOICE_PRESENTATION);

        for (item, text) in menubar.menuitems.iter().zip(texts) {
            self.out.append_byte((5 + text.len()) as u8);
            self.out.append_byte(MINOR_CHOICE_TEXT);
            // Optional mnemonic, AID and numeric selection bytes are not kept
            self.out.append_byte(item.flagbyte1 & 0xF0);
            self.out.append_byte(item.flagbyte2);
            self.out.append_byte(item.flagbyte3);
            self.out.append_data(text);
        }
    }

    /// Define Scroll Bar Field structured field
    fn write_scrollbar(&mut self, scrollbar: &Scrollbar) {
        self.putc(WDSF);
        self.out.append_u16(9);
        self.out.append_data(&[SF_CLASS_5250, DEFINE_SCROLL_BAR_FIELD]);
        self.out.append_byte(if scrollbar.is_horizontal() { 0x80 } else { 0x00 });
        self.out.append_byte(0x00);
        self.out.append_byte(scrollbar.rowscols as u8);
        self.out.append_byte(scrollbar.sliderpos as u8);
        self.out.append_byte(scrollbar.size);
    }
}

/// Choice text up to the first null
fn item_text(text: &[u8]) -> &[u8] {
    let end = text.iter().position(|&b| b == 0x00).unwrap_or(text.len());
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib5250::field::{Continuation, FieldControls};
    use crate::lib5250::gui::MenuItem;

    const HEADER: [u8; 8] = [ESC, CMD_RESTORE_SCREEN, ESC, CMD_CLEAR_UNIT, ESC, CMD_WRITE_TO_DISPLAY, 0, 0];

    fn convert(buf: &DisplayBuffer) -> Vec<u8> {
        let mut ctx = WtdContext::new(buf);
        ctx.set_ic(1, 1);
        ctx.convert().into_vec()
    }

    /// The order stream between the WTD header and the closing IC
    fn body(data: &[u8]) -> &[u8] {
        assert_eq!(&data[data.len() - 3..], &[IC, 1, 1]);
        &data[HEADER.len()..data.len() - 3]
    }

    #[test]
    fn test_blank_screen() {
        let buf = DisplayBuffer::new(80, 24);
        let data = convert(&buf);
        assert_eq!(&data[..8], &HEADER);
        // trailing nulls need no order
        assert!(body(&data).is_empty());
    }

    #[test]
    fn test_alternate_size_header() {
        let buf = DisplayBuffer::new(132, 27);
        let data = convert(&buf);
        assert_eq!(&data[..6], &[ESC, CMD_RESTORE_SCREEN, ESC, CMD_CLEAR_UNIT_ALTERNATE, 0x00, ESC]);
    }

    #[test]
    fn test_ic_carries_cursor() {
        let buf = DisplayBuffer::new(80, 24);
        let mut ctx = WtdContext::new(&buf);
        ctx.set_ic(12, 40);
        let data = ctx.convert().into_vec();
        assert_eq!(&data[8..], &[IC, 12, 40]);
    }

    #[test]
    fn test_short_runs_are_literal() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.set_char_at(0, 0, 0xC1);
        buf.set_char_at(0, 1, 0xC1);
        buf.set_char_at(0, 2, 0xC2);
        let data = convert(&buf);
        assert_eq!(body(&data), &[0xC1, 0xC1, 0xC2]);
    }

    #[test]
    fn test_long_run_uses_repeat_to_address() {
        let mut buf = DisplayBuffer::new(80, 24);
        for col in 0..10 {
            buf.set_char_at(0, col, 0x60);
        }
        buf.set_char_at(0, 10, 0xC1);
        let data = convert(&buf);
        assert_eq!(body(&data), &[RA, 1, 10, 0x60, 0xC1]);
    }

    #[test]
    fn test_null_gap_uses_sba() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.set_char_at(2, 5, 0xC1);
        let data = convert(&buf);
        assert_eq!(body(&data), &[SBA, 3, 6, 0xC1]);
    }

    #[test]
    fn test_three_nulls_prefer_sba_after_clear() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.set_char_at(0, 0, 0xC1);
        buf.set_char_at(0, 4, 0xC2);
        let data = convert(&buf);
        assert_eq!(body(&data), &[0xC1, SBA, 1, 5, 0xC2]);
    }

    #[test]
    fn test_run_to_end_of_screen() {
        let mut buf = DisplayBuffer::new(80, 24);
        for col in 70..80 {
            buf.set_char_at(23, col, 0x40);
        }
        let data = convert(&buf);
        assert_eq!(body(&data), &[SBA, 24, 71, RA, 24, 80, 0x40]);
    }

    #[test]
    fn test_header_and_field() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.set_header_data(&[0x00, 0x00, 0x00, 0x18]);
        buf.set_char_at(0, 0, 0x20);
        let controls = FieldControls { continuation: Continuation::First, ..FieldControls::default() };
        buf.add_field(Field::new(0x4000, 0x24, 0, 1, 5, 80).with_controls(controls));
        let data = convert(&buf);
        let body = body(&data);
        assert_eq!(&body[..6], &[SOH, 4, 0x00, 0x00, 0x00, 0x18]);
        // attribute cell (0,0) becomes the SF; 0x20 passes the attribute test
        assert_eq!(&body[6..], &[SF, 0x40, 0x00, 0x86, 0x01, 0x20, 0x00, 0x05]);
    }

    #[test]
    fn test_overwritten_attribute_uses_field_attribute() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.set_char_at(0, 9, 0xC1);
        buf.add_field(Field::new(0x4000, 0x24, 0, 10, 3, 80));
        let data = convert(&buf);
        assert_eq!(body(&data), &[SBA, 1, 10, SF, 0x40, 0x00, 0x24, 0x00, 0x03]);
    }

    #[test]
    fn test_window_is_recreated_at_origin() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.add_window(Window::new(3, 5, 6, 30));
        buf.set_char_at(2, 4, 0xC1);
        let data = convert(&buf);
        assert_eq!(
            body(&data),
            &[SBA, 3, 5, WDSF, 0x00, 0x09, SF_CLASS_5250, CREATE_WINDOW, 0x80, 0x00, 0x00, 6, 30, 0xC1]
        );
    }

    #[test]
    fn test_scrollbar_written_first() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.add_scrollbar(Scrollbar { direction: 1, rowscols: 40, sliderpos: 3, size: 5, ..Scrollbar::default() });
        let data = convert(&buf);
        assert_eq!(body(&data), &[WDSF, 0x00, 0x09, SF_CLASS_5250, DEFINE_SCROLL_BAR_FIELD, 0x80, 0x00, 40, 3, 5]);
    }

    #[test]
    fn test_selection_field_length() {
        let mut buf = DisplayBuffer::new(80, 24);
        let mut bar = Menubar { menu_type: 0x01, itemsize: 4, height: 1, items: 2, ..Menubar::new() };
        bar.add_item(MenuItem { text: vec![0xC6, 0x89, 0x93, 0x85], size: 6, ..MenuItem::new() });
        bar.add_item(MenuItem { text: vec![0xC8, 0x85, 0x00, 0x00], size: 4, ..MenuItem::new() });
        buf.add_menubar(bar);
        let data = convert(&buf);
        let body = body(&data);
        assert_eq!(body[0], WDSF);
        let len = u16::from_be_bytes([body[1], body[2]]) as usize;
        assert_eq!(len, 4 + 16 + 19 + 9 + 7);
        assert_eq!(body.len(), 1 + len);
        assert_eq!(&body[body.len() - 7..], &[7, MINOR_CHOICE_TEXT, 0x00, 0x00, 0x00, 0xC8, 0x85]);
    }
}
