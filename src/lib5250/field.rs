/// Input field model
///
/// A field is created by a Start-Of-Field order. Its data is not stored
/// here: the characters live in the display buffer grid between the
/// field's start and end positions. The field carries the Field Format
/// Word (FFW), the decoded Field Control Words (FCW) and the geometry
/// needed to find it again.

use std::fmt;

use super::codes::{
    TN5250_KBDSRC_ALPHAONLY, TN5250_KBDSRC_DATA_DISALLOWED, TN5250_KBDSRC_NUMONLY,
    TN5250_KBDSRC_ONLY09,
};

/// Field Format Word bits
pub const FFW_BYPASS: u16 = 0x2000;
pub const FFW_DUP_ENABLE: u16 = 0x1000;
pub const FFW_MODIFIED: u16 = 0x0800;
pub const FFW_TYPE_MASK: u16 = 0x0700;
pub const FFW_AUTO_ENTER: u16 = 0x0080;
pub const FFW_FER: u16 = 0x0040;
pub const FFW_MONOCASE: u16 = 0x0020;
pub const FFW_MANDATORY: u16 = 0x0008;
pub const FFW_MAND_FILL_MASK: u16 = 0x0007;

/// Field types (FFW bits 8-10)
pub const FIELD_ALPHA_SHIFT: u16 = 0x0000;
pub const FIELD_ALPHA_ONLY: u16 = 0x0100;
pub const FIELD_NUM_SHIFT: u16 = 0x0200;
pub const FIELD_NUM_ONLY: u16 = 0x0300;
pub const FIELD_KATA_SHIFT: u16 = 0x0400;
pub const FIELD_DIGIT_ONLY: u16 = 0x0500;
pub const FIELD_MAG_READER: u16 = 0x0600;
pub const FIELD_SIGNED_NUM: u16 = 0x0700;

/// Mandatory fill / adjust values (FFW bits 0-2)
pub const FIELD_NO_ADJUST: u16 = 0x0000;
pub const FIELD_RIGHT_ZERO: u16 = 0x0005;
pub const FIELD_RIGHT_BLANK: u16 = 0x0006;
pub const FIELD_MANDATORY_FILL: u16 = 0x0007;

/// Field Control Word codes
pub const FCW_RESEQUENCE: u8 = 0x80;
pub const FCW_MAGSTRIPE: u16 = 0x8101;
pub const FCW_LIGHTPEN: u16 = 0x8102;
pub const FCW_MAG_AND_LIGHT: u16 = 0x8103;
pub const FCW_LIGHT_AND_ATTN: u16 = 0x8106;
pub const FCW_IDEOGRAPHIC_ONLY: u16 = 0x8200;
pub const FCW_IDEOGRAPHIC_DATATYPE: u16 = 0x8220;
pub const FCW_IDEOGRAPHIC_EITHER: u16 = 0x8240;
pub const FCW_IDEOGRAPHIC_OPEN: u16 = 0x8280;
pub const FCW_IDEOGRAPHIC_OPEN_ALT: u16 = 0x82C0;
pub const FCW_TRANSPARENCY: u8 = 0x84;
pub const FCW_FORWARD_EDGE: u16 = 0x8501;
pub const FCW_CONTINUED_FIRST: u16 = 0x8601;
pub const FCW_CONTINUED_LAST: u16 = 0x8602;
pub const FCW_CONTINUED_MIDDLE: u16 = 0x8603;
pub const FCW_WORDWRAP: u16 = 0x8680;
pub const FCW_PROGRESSION: u8 = 0x88;
pub const FCW_HIGHLIGHT_ENTRY: u8 = 0x89;
pub const FCW_POINTER_AID: u8 = 0x8A;
pub const FCW_SELFCHECK_MOD11: u16 = 0xB140;
pub const FCW_SELFCHECK_MOD10: u16 = 0xB1A0;

/// Position of a field inside a continued-entry group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Continuation {
    #[default]
    None,
    First,
    Middle,
    Last,
}

/// Decoded Field Control Words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldControls {
    pub resequence: u8,
    pub magstripe: bool,
    pub lightpen: bool,
    pub mag_and_light: bool,
    pub light_and_attn: bool,
    pub ideographic_only: bool,
    pub ideographic_datatype: bool,
    pub ideographic_either: bool,
    pub ideographic_open: bool,
    pub transparency: u8,
    pub forward_edge: bool,
    pub continuation: Continuation,
    pub wordwrap: bool,
    /// Entry id of the field the cursor progresses to (0 = none)
    pub progression_id: u8,
    pub highlight_entry_attr: u8,
    pub pointer_aid: u8,
    pub selfcheck_mod11: bool,
    pub selfcheck_mod10: bool,
}

impl FieldControls {
    /// Fold one FCW into the controls. Returns false for a code this
    /// client does not know; the word is still consumed by the caller.
    pub fn apply(&mut self, fcw: u16) -> bool {
        let [hi, lo] = fcw.to_be_bytes();
        match hi {
            FCW_RESEQUENCE => self.resequence = lo,
            FCW_TRANSPARENCY => self.transparency = lo,
            FCW_PROGRESSION => self.progression_id = lo,
            FCW_HIGHLIGHT_ENTRY => self.highlight_entry_attr = lo,
            FCW_POINTER_AID => self.pointer_aid = lo,
            _ => match fcw {
                FCW_MAGSTRIPE => self.magstripe = true,
                FCW_LIGHTPEN => self.lightpen = true,
                FCW_MAG_AND_LIGHT => self.mag_and_light = true,
                FCW_LIGHT_AND_ATTN => self.light_and_attn = true,
                FCW_IDEOGRAPHIC_ONLY => self.ideographic_only = true,
                FCW_IDEOGRAPHIC_DATATYPE => self.ideographic_datatype = true,
                FCW_IDEOGRAPHIC_EITHER => self.ideographic_either = true,
                FCW_IDEOGRAPHIC_OPEN | FCW_IDEOGRAPHIC_OPEN_ALT => self.ideographic_open = true,
                FCW_FORWARD_EDGE => self.forward_edge = true,
                FCW_CONTINUED_FIRST => self.continuation = Continuation::First,
                FCW_CONTINUED_MIDDLE => self.continuation = Continuation::Middle,
                FCW_CONTINUED_LAST => self.continuation = Continuation::Last,
                FCW_WORDWRAP => self.wordwrap = true,
                FCW_SELFCHECK_MOD11 => self.selfcheck_mod11 = true,
                FCW_SELFCHECK_MOD10 => self.selfcheck_mod10 = true,
                _ => return false,
            },
        }
        true
    }

    /// The FCWs that reproduce these controls, in a stable order.
    pub fn encode(&self) -> Vec<u16> {
        let mut out = Vec::new();
        let word = |hi: u8, lo: u8| u16::from_be_bytes([hi, lo]);
        if self.resequence != 0 {
            out.push(word(FCW_RESEQUENCE, self.resequence));
        }
        for (set, code) in [
            (self.magstripe, FCW_MAGSTRIPE),
            (self.lightpen, FCW_LIGHTPEN),
            (self.mag_and_light, FCW_MAG_AND_LIGHT),
            (self.light_and_attn, FCW_LIGHT_AND_ATTN),
            (self.ideographic_only, FCW_IDEOGRAPHIC_ONLY),
            (self.ideographic_datatype, FCW_IDEOGRAPHIC_DATATYPE),
            (self.ideographic_either, FCW_IDEOGRAPHIC_EITHER),
            (self.ideographic_open, FCW_IDEOGRAPHIC_OPEN),
        ] {
            if set {
                out.push(code);
            }
        }
        if self.transparency != 0 {
            out.push(word(FCW_TRANSPARENCY, self.transparency));
        }
        if self.forward_edge {
            out.push(FCW_FORWARD_EDGE);
        }
        match self.continuation {
            Continuation::None => {}
            Continuation::First => out.push(FCW_CONTINUED_FIRST),
            Continuation::Middle => out.push(FCW_CONTINUED_MIDDLE),
            Continuation::Last => out.push(FCW_CONTINUED_LAST),
        }
        if self.wordwrap {
            out.push(FCW_WORDWRAP);
        }
        if self.progression_id != 0 {
            out.push(word(FCW_PROGRESSION, self.progression_id));
        }
        if self.highlight_entry_attr != 0 {
            out.push(word(FCW_HIGHLIGHT_ENTRY, self.highlight_entry_attr));
        }
        if self.pointer_aid != 0 {
            out.push(word(FCW_POINTER_AID, self.pointer_aid));
        }
        if self.selfcheck_mod11 {
            out.push(FCW_SELFCHECK_MOD11);
        }
        if self.selfcheck_mod10 {
            out.push(FCW_SELFCHECK_MOD10);
        }
        out
    }
}

/// One input field of the format table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Sequence number inside the format table
    pub id: usize,
    /// Logical entry number; continued fields share one
    pub entry_id: usize,
    pub start_row: usize,
    pub start_col: usize,
    pub length: usize,
    /// Screen width used for row/column arithmetic
    pub width: usize,
    pub ffw: u16,
    pub attribute: u8,
    pub controls: FieldControls,
}

impl Field {
    pub fn new(ffw: u16, attribute: u8, start_row: usize, start_col: usize, length: usize, width: usize) -> Self {
        Self {
            id: 0,
            entry_id: 0,
            start_row,
            start_col,
            length,
            width,
            ffw,
            attribute,
            controls: FieldControls::default(),
        }
    }

    pub fn with_controls(mut self, controls: FieldControls) -> Self {
        self.controls = controls;
        self
    }

    /// Flattened start position
    pub fn start_pos(&self) -> usize {
        self.start_row * self.width + self.start_col
    }

    /// Flattened position of the last cell
    pub fn end_pos(&self) -> usize {
        self.start_pos() + self.length.max(1) - 1
    }

    pub fn end_row(&self) -> usize {
        self.end_pos() / self.width
    }

    pub fn end_col(&self) -> usize {
        self.end_pos() % self.width
    }

    /// Whether the cell at (y, x) belongs to this field
    pub fn hit_test(&self, y: usize, x: usize) -> bool {
        let pos = y * self.width + x;
        self.length > 0 && pos >= self.start_pos() && pos <= self.end_pos()
    }

    /// Cells between the field start and (y, x)
    pub fn count_left(&self, y: usize, x: usize) -> usize {
        (y * self.width + x).saturating_sub(self.start_pos())
    }

    /// Cells between (y, x) and the field end
    pub fn count_right(&self, y: usize, x: usize) -> usize {
        self.end_pos().saturating_sub(y * self.width + x)
    }

    pub fn field_type(&self) -> u16 {
        self.ffw & FFW_TYPE_MASK
    }

    /// Adjust/fill type (FFW bits 0-2)
    pub fn mand_fill_type(&self) -> u16 {
        self.ffw & FFW_MAND_FILL_MASK
    }

    pub fn is_bypass(&self) -> bool {
        self.ffw & FFW_BYPASS != 0
    }

    pub fn is_dup_enable(&self) -> bool {
        self.ffw & FFW_DUP_ENABLE != 0
    }

    pub fn is_modified(&self) -> bool {
        self.ffw & FFW_MODIFIED != 0
    }

    pub fn is_auto_enter(&self) -> bool {
        self.ffw & FFW_AUTO_ENTER != 0
    }

    pub fn is_fer(&self) -> bool {
        self.ffw & FFW_FER != 0
    }

    pub fn is_monocase(&self) -> bool {
        self.ffw & FFW_MONOCASE != 0
    }

    pub fn is_mandatory(&self) -> bool {
        self.ffw & FFW_MANDATORY != 0
    }

    pub fn is_signed_num(&self) -> bool {
        self.field_type() == FIELD_SIGNED_NUM
    }

    pub fn is_num_only(&self) -> bool {
        self.field_type() == FIELD_NUM_ONLY
    }

    pub fn set_modified(&mut self, on: bool) {
        if on {
            self.ffw |= FFW_MODIFIED;
        } else {
            self.ffw &= !FFW_MODIFIED;
        }
    }

    pub fn is_continued(&self) -> bool {
        self.controls.continuation != Continuation::None
    }

    pub fn is_continued_first(&self) -> bool {
        self.controls.continuation == Continuation::First
    }

    pub fn is_continued_middle(&self) -> bool {
        self.controls.continuation == Continuation::Middle
    }

    pub fn is_continued_last(&self) -> bool {
        self.controls.continuation == Continuation::Last
    }

    pub fn is_wordwrap(&self) -> bool {
        self.controls.wordwrap
    }

    pub fn progression_id(&self) -> u8 {
        self.controls.progression_id
    }

    /// Check a local-charset character against the field type.
    /// The error carries the keyboard error code to report.
    pub fn valid_char(&self, ch: u8) -> Result<(), u16> {
        let c = ch as char;
        let punct = matches!(c, ',' | '.' | '-' | ' ');
        match self.field_type() {
            FIELD_ALPHA_ONLY if !(c.is_alphabetic() || punct) => Err(TN5250_KBDSRC_ALPHAONLY),
            FIELD_NUM_ONLY if !(c.is_ascii_digit() || punct) => Err(TN5250_KBDSRC_NUMONLY),
            FIELD_DIGIT_ONLY | FIELD_SIGNED_NUM if !c.is_ascii_digit() => Err(TN5250_KBDSRC_ONLY09),
            FIELD_MAG_READER => Err(TN5250_KBDSRC_DATA_DISALLOWED),
            _ => Ok(()),
        }
    }

    pub fn description(&self) -> &'static str {
        match self.field_type() {
            FIELD_ALPHA_SHIFT => "Alpha Shift",
            FIELD_ALPHA_ONLY => "Alpha Only",
            FIELD_NUM_SHIFT => "Numeric Shift",
            FIELD_NUM_ONLY => "Numeric Only",
            FIELD_KATA_SHIFT => "Katakana",
            FIELD_DIGIT_ONLY => "Digits Only",
            FIELD_MAG_READER => "Mag Reader I/O Field",
            _ => "Signed Numeric",
        }
    }

    pub fn adjust_description(&self) -> &'static str {
        match self.mand_fill_type() {
            FIELD_NO_ADJUST => "No Adjust",
            1 => "Reserved 1",
            2 => "Reserved 2",
            3 => "Reserved 3",
            4 => "Reserved 4",
            FIELD_RIGHT_ZERO => "Right Adjust, Zero Fill",
            FIELD_RIGHT_BLANK => "Right Adjust, Blank Fill",
            _ => "Mandatory Fill",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field {} (entry {}) at ({}, {}) len {} ffw {:04X} attr {:02X}: {}, {}",
            self.id,
            self.entry_id,
            self.start_row,
            self.start_col,
            self.length,
            self.ffw,
            self.attribute,
            self.description(),
            self.adjust_description()
        )?;
        if self.is_bypass() {
            write!(f, ", bypass")?;
        }
        if self.is_continued() {
            write!(f, ", continued {:?}", self.controls.continuation)?;
        }
        if self.is_wordwrap() {
            write!(f, ", wordwrap")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_wraps_rows() {
        let field = Field::new(0x4000, 0x24, 0, 75, 10, 80);
        assert_eq!(field.start_pos(), 75);
        assert_eq!(field.end_pos(), 84);
        assert_eq!((field.end_row(), field.end_col()), (1, 4));
        assert!(field.hit_test(0, 79));
        assert!(field.hit_test(1, 4));
        assert!(!field.hit_test(1, 5));
        assert!(!field.hit_test(0, 74));
        assert_eq!(field.count_left(1, 0), 5);
        assert_eq!(field.count_right(1, 0), 4);
    }

    #[test]
    fn test_ffw_flags() {
        let mut field = Field::new(FFW_BYPASS | FIELD_SIGNED_NUM | FFW_AUTO_ENTER | FIELD_RIGHT_ZERO, 0x20, 2, 2, 5, 80);
        assert!(field.is_bypass());
        assert!(field.is_signed_num());
        assert!(field.is_auto_enter());
        assert!(!field.is_modified());
        field.set_modified(true);
        assert!(field.is_modified());
        assert_eq!(field.mand_fill_type(), FIELD_RIGHT_ZERO);
        assert_eq!(field.adjust_description(), "Right Adjust, Zero Fill");
        assert_eq!(field.description(), "Signed Numeric");
    }

    #[test]
    fn test_valid_char_per_type() {
        let mut field = Field::new(FIELD_ALPHA_ONLY, 0x20, 0, 0, 5, 80);
        assert!(field.valid_char(b'a').is_ok());
        assert!(field.valid_char(b'-').is_ok());
        assert_eq!(field.valid_char(b'7'), Err(TN5250_KBDSRC_ALPHAONLY));

        field.ffw = FIELD_NUM_ONLY;
        assert!(field.valid_char(b'7').is_ok());
        assert_eq!(field.valid_char(b'x'), Err(TN5250_KBDSRC_NUMONLY));

        field.ffw = FIELD_DIGIT_ONLY;
        assert_eq!(field.valid_char(b'.'), Err(TN5250_KBDSRC_ONLY09));

        field.ffw = FIELD_MAG_READER;
        assert_eq!(field.valid_char(b'1'), Err(TN5250_KBDSRC_DATA_DISALLOWED));

        field.ffw = FIELD_ALPHA_SHIFT;
        assert!(field.valid_char(b'#').is_ok());
    }

    #[test]
    fn test_fcw_decode_and_encode() {
        let mut controls = FieldControls::default();
        assert!(controls.apply(0x8601));
        assert!(controls.apply(0x8680));
        assert!(controls.apply(0x8805));
        assert!(controls.apply(0x8A3C));
        assert!(!controls.apply(0x8F00));
        assert_eq!(controls.continuation, Continuation::First);
        assert!(controls.wordwrap);
        assert_eq!(controls.progression_id, 5);
        assert_eq!(controls.pointer_aid, 0x3C);
        assert_eq!(controls.encode(), vec![0x8601, 0x8680, 0x8805, 0x8A3C]);

        let mut decoded = FieldControls::default();
        for fcw in controls.encode() {
            decoded.apply(fcw);
        }
        assert_eq!(decoded, controls);
    }

    #[test]
    fn test_display_format() {
        let field = Field::new(FIELD_NUM_ONLY, 0x24, 1, 2, 5, 80);
        let text = field.to_string();
        assert!(text.contains("Numeric Only"));
        assert!(text.contains("No Adjust"));
    }
}
