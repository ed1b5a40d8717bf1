/// Display buffer: the character grid and format table of one screen
///
/// The grid holds raw EBCDIC bytes, one per cell, row major. Alongside it
/// the buffer keeps the cursor, the insert-cursor target set by the IC
/// order, the field table built by Start-Of-Field orders, the format table
/// header from Start-Of-Header and the GUI constructs defined by
/// structured fields. A `Display` keeps a stack of these for SAVE/RESTORE.

use super::codes::{AID_F1, AID_F13, AID_F24};
use super::field::Field;
use super::gui::{Menubar, Scrollbar, Window};
use crate::protocol_common::ebcdic::CharMap;

/// Marks a cell emptied by word-wrap reflow
pub const WORD_WRAP_SPACE: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer {
    width: usize,
    height: usize,
    cx: usize,
    cy: usize,
    /// Insert-cursor target
    tcx: usize,
    tcy: usize,
    data: Vec<u8>,
    fields: Vec<Field>,
    entry_field_count: usize,
    master_mdt: bool,
    header: Option<Vec<u8>>,
    windows: Vec<Window>,
    scrollbars: Vec<Scrollbar>,
    menubars: Vec<Menubar>,
}

impl DisplayBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            cx: 0,
            cy: 0,
            tcx: 0,
            tcy: 0,
            data: vec![0; width * height],
            fields: Vec::new(),
            entry_field_count: 0,
            master_mdt: false,
            header: None,
            windows: Vec::new(),
            scrollbars: Vec::new(),
            menubars: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cursor_x(&self) -> usize {
        self.cx
    }

    pub fn cursor_y(&self) -> usize {
        self.cy
    }

    /// Move the cursor, clamped to the grid.
    pub fn cursor_set(&mut self, y: usize, x: usize) {
        self.cy = y.min(self.height - 1);
        self.cx = x.min(self.width - 1);
    }

    /// Resize; everything is cleared.
    pub fn set_size(&mut self, rows: usize, cols: usize) {
        self.width = cols.max(1);
        self.height = rows.max(1);
        self.data = vec![0; self.width * self.height];
        self.clear();
    }

    /// Zero the grid, home the cursor and drop the format table.
    /// GUI constructs survive.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.cx = 0;
        self.cy = 0;
        self.clear_table();
    }

    /// Drop fields, the master MDT and the header
    pub fn clear_table(&mut self) {
        self.fields.clear();
        self.entry_field_count = 0;
        self.master_mdt = false;
        self.header = None;
    }

    pub fn set_header_data(&mut self, data: &[u8]) {
        self.header = if data.is_empty() { None } else { Some(data.to_vec()) };
    }

    pub fn header_data(&self) -> Option<&[u8]> {
        self.header.as_deref()
    }

    /// Whether field data goes out with this AID. The header carries one
    /// "suppress data" bit per function key: F1-F8 in byte 6, F9-F16 in
    /// byte 5, F17-F24 in byte 4, lowest key in the lowest bit. Without a
    /// long enough header every key sends data.
    pub fn send_data_for_aid_key(&self, aid: i32) -> bool {
        let header = match &self.header {
            Some(h) if h.len() > 6 => h,
            _ => return true,
        };
        let key = match aid {
            a if (AID_F1..AID_F1 + 12).contains(&a) => a - AID_F1,
            a if (AID_F13..=AID_F24).contains(&a) => a - AID_F13 + 12,
            _ => return true,
        };
        let (byte, bit) = (6 - (key / 8) as usize, key % 8);
        header[byte] & (0x01 << bit) == 0
    }

    pub fn master_mdt(&self) -> bool {
        self.master_mdt
    }

    pub fn set_master_mdt(&mut self, on: bool) {
        self.master_mdt = on;
    }

    /// Add a field to the table, assigning its id and entry id.
    /// Continued middle and last fields share the entry id of their first.
    pub fn add_field(&mut self, mut field: Field) -> usize {
        field.id = self.fields.len();
        field.width = self.width;
        if !field.is_continued_middle() && !field.is_continued_last() {
            self.entry_field_count += 1;
        }
        field.entry_id = self.entry_field_count;
        log::trace!("adding {}", field);
        let id = field.id;
        self.fields.push(field);
        id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, id: usize) -> Option<&Field> {
        self.fields.get(id)
    }

    pub fn field_mut(&mut self, id: usize) -> Option<&mut Field> {
        self.fields.get_mut(id)
    }

    /// Id of the field covering (y, x)
    pub fn field_yx(&self, y: usize, x: usize) -> Option<usize> {
        self.fields.iter().find(|f| f.hit_test(y, x)).map(|f| f.id)
    }

    pub fn first_non_bypass(&self) -> Option<usize> {
        self.fields.iter().find(|f| !f.is_bypass()).map(|f| f.id)
    }

    /// Ids of the continued-entry group containing `id`, first to last.
    /// A field that is not continued forms a group of one.
    pub fn continued_group(&self, id: usize) -> Vec<usize> {
        let Some(field) = self.fields.get(id) else {
            return Vec::new();
        };
        if !field.is_continued() {
            return vec![id];
        }
        let mut first = id;
        while first > 0 && !self.fields[first].is_continued_first() && self.fields[first - 1].is_continued() {
            first -= 1;
        }
        let mut last = first;
        while last + 1 < self.fields.len()
            && !self.fields[last].is_continued_last()
            && self.fields[last + 1].is_continued()
        {
            last += 1;
        }
        (first..=last).collect()
    }

    /// Set the MDT of a field (on the first field of a continued group)
    /// and the buffer's master MDT.
    pub fn set_mdt(&mut self, id: usize) {
        let target = self.continued_group(id).first().copied().unwrap_or(id);
        if let Some(field) = self.fields.get_mut(target) {
            field.set_modified(true);
        }
        self.master_mdt = true;
    }

    /// Grid bytes of a field
    pub fn field_data(&self, id: usize) -> &[u8] {
        match self.fields.get(id) {
            Some(f) => {
                let end = (f.end_pos() + 1).min(self.data.len());
                &self.data[f.start_pos().min(end)..end]
            }
            None => &[],
        }
    }

    pub fn field_data_mut(&mut self, id: usize) -> &mut [u8] {
        match self.fields.get(id) {
            Some(f) => {
                let end = (f.end_pos() + 1).min(self.data.len());
                let start = f.start_pos().min(end);
                &mut self.data[start..end]
            }
            None => &mut [],
        }
    }

    /// Cursor right by `n` cells with wraparound. On a selection field row
    /// the selection moves instead.
    pub fn right(&mut self, n: usize) {
        if let Some(pos) = self.menubar_step(true) {
            self.cursor_set(pos.0, pos.1);
            return;
        }
        self.step_right(n);
    }

    pub fn left(&mut self) {
        if let Some(pos) = self.menubar_step(false) {
            self.cursor_set(pos.0, pos.1);
            return;
        }
        self.step_left();
    }

    pub fn up(&mut self) {
        if let Some(pos) = self.menubar_step(false) {
            self.cursor_set(pos.0, pos.1);
            return;
        }
        self.cy = if self.cy == 0 { self.height - 1 } else { self.cy - 1 };
    }

    pub fn down(&mut self) {
        if let Some(pos) = self.menubar_step(true) {
            self.cursor_set(pos.0, pos.1);
            return;
        }
        self.cy = (self.cy + 1) % self.height;
    }

    fn menubar_step(&mut self, forward: bool) -> Option<(usize, usize)> {
        let (x, y) = (self.cx, self.cy);
        let menubar = self.menubars.iter_mut().find(|m| m.hit_test(x, y))?;
        if forward {
            menubar.select_next(x, y)
        } else {
            menubar.select_prev(x, y)
        }
    }

    fn step_right(&mut self, n: usize) {
        let cx = self.cx + n;
        self.cy = (self.cy + cx / self.width) % self.height;
        self.cx = cx % self.width;
    }

    fn step_left(&mut self) {
        if self.cx == 0 {
            self.cx = self.width - 1;
            self.cy = if self.cy == 0 { self.height - 1 } else { self.cy - 1 };
        } else {
            self.cx -= 1;
        }
    }

    pub fn set_ic(&mut self, y: usize, x: usize) {
        self.tcy = y.min(self.height - 1);
        self.tcx = x.min(self.width - 1);
    }

    /// Insert-cursor target as (y, x)
    pub fn ic(&self) -> (usize, usize) {
        (self.tcy, self.tcx)
    }

    pub fn goto_ic(&mut self) {
        self.cy = self.tcy;
        self.cx = self.tcx;
    }

    /// Write at the cursor and advance one cell.
    pub fn addch(&mut self, c: u8) {
        let pos = self.cy * self.width + self.cx;
        self.data[pos] = c;
        self.right(1);
    }

    /// Write `c` into `count` cells from the cursor on, stepping linearly.
    /// Selection field rows do not capture the cursor here.
    pub fn repeat_char(&mut self, c: u8, count: usize) {
        for _ in 0..count {
            let pos = self.cy * self.width + self.cx;
            self.data[pos] = c;
            self.step_right(1);
        }
    }

    /// Delete the character under the cursor, pulling the following
    /// `shift` cells left. In a continued group the shift runs through
    /// the remaining member fields, hopping from each field's end to the
    /// next field's start.
    pub fn del(&mut self, field_id: usize, shift: usize) {
        let group = self.continued_group(field_id);
        let mut cur = group.iter().position(|&id| id == field_id).unwrap_or(0);
        let mut shift = shift;
        for &next in group.iter().skip(cur + 1) {
            shift += self.fields[next].length.saturating_sub(1);
        }

        let total = self.data.len();
        let mut pos = self.cy * self.width + self.cx;
        let mut i = 0;
        while i < shift {
            let mut fwd = (pos + 1) % total;
            let mut hopped = false;
            if let Some(&fid) = group.get(cur) {
                let f = &self.fields[fid];
                if f.is_continued() && !f.is_continued_last() && fwd > f.end_pos() && cur + 1 < group.len() {
                    cur += 1;
                    fwd = self.fields[group[cur]].start_pos();
                    hopped = true;
                }
            }
            self.data[pos] = self.data[fwd];
            pos = fwd;
            if !hopped {
                i += 1;
            }
        }
        self.data[pos] = 0x00;
    }

    /// Delete within the cursor's own field only; the vacated cell
    /// becomes a word-wrap space.
    pub fn del_this_field_only(&mut self, shift: usize) {
        let total = self.data.len();
        let mut pos = self.cy * self.width + self.cx;
        for _ in 0..shift {
            let fwd = (pos + 1) % total;
            self.data[pos] = self.data[fwd];
            pos = fwd;
        }
        self.data[pos] = WORD_WRAP_SPACE;
    }

    /// Insert `c` at the cursor, rippling `shift` cells right (through the
    /// rest of a continued group), then advance the cursor.
    pub fn ins(&mut self, field_id: usize, c: u8, shift: usize) {
        let group = self.continued_group(field_id);
        let mut cur = group.iter().position(|&id| id == field_id).unwrap_or(0);
        let mut shift = shift;
        for &next in group.iter().skip(cur + 1) {
            shift += self.fields[next].length.saturating_sub(1);
        }

        let total = self.data.len();
        let mut pos = self.cy * self.width + self.cx;
        let mut carry = c;
        let mut i = 0;
        while i <= shift {
            std::mem::swap(&mut self.data[pos], &mut carry);
            pos = (pos + 1) % total;
            if let Some(&fid) = group.get(cur) {
                let f = &self.fields[fid];
                if f.is_continued() && !f.is_continued_last() && pos > f.end_pos() && cur + 1 < group.len() {
                    cur += 1;
                    pos = self.fields[group[cur]].start_pos();
                    continue;
                }
            }
            i += 1;
        }
        self.right(1);
    }

    /// Scroll rows `top..=bot` by `lines` (negative = up). Rows uncovered
    /// by the move are cleared.
    pub fn roll(&mut self, top: usize, bot: usize, lines: i32) {
        let bot = bot.min(self.height - 1);
        if lines == 0 || top > bot {
            return;
        }
        let w = self.width;
        let count = lines.unsigned_abs() as usize;
        if lines < 0 {
            for n in top..=bot {
                if n >= top + count {
                    self.data.copy_within(n * w..(n + 1) * w, (n - count) * w);
                }
            }
            let first_cleared = (bot + 1).saturating_sub(count).max(top);
            self.data[first_cleared * w..(bot + 1) * w].iter_mut().for_each(|b| *b = 0);
        } else {
            for n in (top..=bot).rev() {
                if n + count <= bot {
                    self.data.copy_within(n * w..(n + 1) * w, (n + count) * w);
                }
            }
            let last_cleared = (top + count).min(bot + 1);
            self.data[top * w..last_cleared * w].iter_mut().for_each(|b| *b = 0);
        }
    }

    pub fn char_at(&self, y: usize, x: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn set_char_at(&mut self, y: usize, x: usize, c: u8) {
        let pos = y * self.width + x;
        self.data[pos] = c;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Row used for operator messages: header byte 3 (1-based) when the
    /// header carries it, else the last row.
    pub fn msg_line(&self) -> usize {
        let last = self.height - 1;
        match &self.header {
            Some(h) if h.len() >= 4 && h[3] >= 1 => (h[3] as usize - 1).min(last),
            _ => last,
        }
    }

    /// Move the cursor to the start of the previous word.
    pub fn prevword(&mut self) {
        let mut state = 0;
        for _ in 1..self.data.len() {
            self.step_left();
            let c = self.char_at(self.cy, self.cx);
            match state {
                0 if c <= 0x40 => state = 1,
                1 if c > 0x40 => state = 2,
                2 if c <= 0x40 => {
                    self.step_right(1);
                    return;
                }
                _ => {}
            }
        }
    }

    /// Move the cursor to the start of the next word.
    pub fn nextword(&mut self) {
        let mut found_blank = false;
        for _ in 1..self.data.len() {
            self.step_right(1);
            let c = self.char_at(self.cy, self.cx);
            if c <= 0x40 {
                found_blank = true;
            } else if found_blank {
                break;
            }
        }
    }

    pub fn add_window(&mut self, mut window: Window) -> usize {
        window.id = self.windows.iter().map(|w| w.id + 1).max().unwrap_or(0);
        let id = window.id;
        self.windows.push(window);
        id
    }

    pub fn add_scrollbar(&mut self, mut scrollbar: Scrollbar) -> usize {
        scrollbar.id = self.scrollbars.iter().map(|s| s.id + 1).max().unwrap_or(0);
        let id = scrollbar.id;
        self.scrollbars.push(scrollbar);
        id
    }

    pub fn add_menubar(&mut self, mut menubar: Menubar) -> usize {
        menubar.id = self.menubars.iter().map(|m| m.id + 1).max().unwrap_or(0);
        let id = menubar.id;
        self.menubars.push(menubar);
        id
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn scrollbars(&self) -> &[Scrollbar] {
        &self.scrollbars
    }

    pub fn menubars(&self) -> &[Menubar] {
        &self.menubars
    }

    pub fn menubar_mut(&mut self, id: usize) -> Option<&mut Menubar> {
        self.menubars.iter_mut().find(|m| m.id == id)
    }

    /// Window whose origin is at the 1-based (x, y)
    pub fn window_hit_test(&self, x: usize, y: usize) -> Option<&Window> {
        self.windows.iter().find(|w| w.hit_test(x, y))
    }

    pub fn window_match(&self, x: usize, y: usize, width: usize, height: usize) -> Option<usize> {
        self.windows.iter().find(|w| w.matches(x, y, width, height)).map(|w| w.id)
    }

    pub fn window_mut(&mut self, id: usize) -> Option<&mut Window> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    pub fn menubar_hit_test(&self, x: usize, y: usize) -> Option<&Menubar> {
        self.menubars.iter().find(|m| m.hit_test(x, y))
    }

    pub fn remove_window(&mut self, id: usize) -> Option<Window> {
        let index = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(index))
    }

    pub fn take_windows(&mut self) -> Vec<Window> {
        std::mem::take(&mut self.windows)
    }

    pub fn take_scrollbars(&mut self) -> Vec<Scrollbar> {
        std::mem::take(&mut self.scrollbars)
    }

    pub fn take_menubars(&mut self) -> Vec<Menubar> {
        std::mem::take(&mut self.menubars)
    }

    /// One row as local text; nulls and attribute bytes show as blanks.
    pub fn row_text(&self, row: usize, map: &CharMap) -> String {
        let start = row * self.width;
        self.data[start..start + self.width]
            .iter()
            .map(|&b| if b == 0 || map.is_attribute(b) { ' ' } else { map.to_char(b) })
            .collect()
    }
}
