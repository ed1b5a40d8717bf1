/// TN5250 Protocol Constants and Codes
///
/// Command, order, record-header, negative-response, AID and keyboard
/// constants of the 5250 data stream as defined by the 5494 Functions
/// Reference (SC30-3533-04), plus the key codes the display understands.

/// Escape byte that introduces every 5250 command
pub const ESC: u8 = 0x04;

/// 5250 Protocol Commands
pub const CMD_CLEAR_UNIT: u8 = 0x40;
pub const CMD_CLEAR_UNIT_ALTERNATE: u8 = 0x20;
pub const CMD_CLEAR_FORMAT_TABLE: u8 = 0x50;
pub const CMD_WRITE_TO_DISPLAY: u8 = 0x11;
pub const CMD_WRITE_ERROR_CODE: u8 = 0x21;
pub const CMD_WRITE_ERROR_CODE_WINDOW: u8 = 0x22;
pub const CMD_READ_INPUT_FIELDS: u8 = 0x42;
pub const CMD_READ_MDT_FIELDS: u8 = 0x52;
pub const CMD_READ_MDT_FIELDS_ALT: u8 = 0x82;
pub const CMD_READ_SCREEN_IMMEDIATE: u8 = 0x62;
pub const CMD_READ_SCREEN_EXTENDED: u8 = 0x64;
pub const CMD_READ_SCREEN_PRINT: u8 = 0x66;
pub const CMD_READ_SCREEN_PRINT_EXTENDED: u8 = 0x68;
pub const CMD_READ_SCREEN_PRINT_GRID: u8 = 0x6A;
pub const CMD_READ_SCREEN_PRINT_EXT_GRID: u8 = 0x6C;
pub const CMD_READ_IMMEDIATE: u8 = 0x72;
pub const CMD_READ_IMMEDIATE_ALT: u8 = 0x83;
pub const CMD_SAVE_SCREEN: u8 = 0x02;
pub const CMD_SAVE_PARTIAL_SCREEN: u8 = 0x03;
pub const CMD_RESTORE_SCREEN: u8 = 0x12;
pub const CMD_RESTORE_PARTIAL_SCREEN: u8 = 0x13;
pub const CMD_ROLL: u8 = 0x23;
pub const CMD_WRITE_STRUCTURED_FIELD: u8 = 0xF3;
/// Undocumented command sent by some hosts, ignored.
pub const CMD_UNDOCUMENTED_0A: u8 = 0x0A;

/// 5250 Protocol Orders
pub const SOH: u8 = 0x01;  // Start of header
pub const RA: u8 = 0x02;   // Repeat to address
pub const EA: u8 = 0x03;   // Erase to address
pub const TD: u8 = 0x10;   // Transparent data
pub const SBA: u8 = 0x11;  // Set buffer address
pub const WEA: u8 = 0x12;  // Write extended attribute
pub const IC: u8 = 0x13;   // Insert cursor
pub const MC: u8 = 0x14;   // Move cursor
pub const WDSF: u8 = 0x15; // Write to display structured field
pub const SF: u8 = 0x1D;   // Start of field

/// Structured field class shared by every 5250 structured field
pub const SF_CLASS_5250: u8 = 0xD9;

/// Write to display structured field types
pub const DEFINE_SELECTION_FIELD: u8 = 0x50;
pub const CREATE_WINDOW: u8 = 0x51;
pub const UNREST_WIN_CURS_MOVE: u8 = 0x52;
pub const DEFINE_SCROLL_BAR_FIELD: u8 = 0x53;
pub const WRITE_DATA: u8 = 0x54;
pub const PROGRAMMABLE_MOUSE_BUT: u8 = 0x55;
pub const REM_GUI_SEL_FIELD: u8 = 0x58;
pub const REM_GUI_WINDOW: u8 = 0x59;
pub const REM_GUI_SCROLL_BAR_FIELD: u8 = 0x5B;
pub const REM_ALL_GUI_CONSTRUCTS: u8 = 0x5F;
pub const DRAW_ERASE_GRID_LINES: u8 = 0x60;
pub const CLEAR_GRID_LINE_BUFFER: u8 = 0x61;

/// Write structured field types
pub const DEFINE_AUDIT_WINDOW_TABLE: u8 = 0x30;
pub const DEFINE_COMMAND_KEY_FUNCTION: u8 = 0x31;
pub const READ_TEXT_SCREEN: u8 = 0x32;
pub const DEFINE_PENDING_OPERATIONS: u8 = 0x33;
pub const DEFINE_TEXT_SCREEN_FORMAT: u8 = 0x34;
pub const DEFINE_SCALE_TIME: u8 = 0x35;
pub const WRITE_TEXT_SCREEN: u8 = 0x36;
pub const DEFINE_SPECIAL_CHARACTERS: u8 = 0x37;
pub const PENDING_DATA: u8 = 0x38;
pub const DEFINE_OPERATOR_ERROR_MSGS: u8 = 0x39;
pub const DEFINE_PITCH_TABLE: u8 = 0x3A;
pub const DEFINE_FAKE_DP_CMD_KEY_FUNC: u8 = 0x3B;
pub const PASS_THROUGH: u8 = 0x3F;
pub const SF_5250_QUERY: u8 = 0x70;
pub const SF_5250_QUERY_STATION_STATE: u8 = 0x72;

/// Record flow types (bytes 4-5 of the record header)
pub const FLOW_DISPLAY: u16 = 0x0000;
pub const FLOW_STARTUP: u16 = 0x0090;
pub const FLOW_SERVERO: u16 = 0x0011;
pub const FLOW_CLIENTO: u16 = 0x0012;

/// Record header flags (byte 7 of the record header)
pub const H_NONE: u8 = 0x00;
pub const H_ERR: u8 = 0x80;
pub const H_ATN: u8 = 0x40;
pub const H_PRINTER_READY: u8 = 0x20;
pub const H_FIRST_OF_CHAIN: u8 = 0x10;
pub const H_LAST_OF_CHAIN: u8 = 0x08;
pub const H_SRQ: u8 = 0x04;
pub const H_TRQ: u8 = 0x02;
pub const H_HLP: u8 = 0x01;

/// Record opcodes (byte 9 of the record header)
pub const OPCODE_NO_OP: u8 = 0x00;
pub const OPCODE_INVITE: u8 = 0x01;
pub const OPCODE_OUTPUT_ONLY: u8 = 0x02;
pub const OPCODE_PUT_GET: u8 = 0x03;
pub const OPCODE_SAVE_SCR: u8 = 0x04;
pub const OPCODE_RESTORE_SCR: u8 = 0x05;
pub const OPCODE_READ_IMMED: u8 = 0x06;
pub const OPCODE_READ_SCR: u8 = 0x08;
pub const OPCODE_CANCEL_INVITE: u8 = 0x0A;
pub const OPCODE_MESSAGE_ON: u8 = 0x0B;
pub const OPCODE_MESSAGE_OFF: u8 = 0x0C;

/// Data stream negative response codes, sent back with the ERR flag
pub const NR_INVALID_COMMAND: u32 = 0x1003_0101;
pub const NR_CLEAR_UNIT_ALTERNATE: u32 = 0x1003_0105;
pub const NR_INVALID_ROW_COL_ADDR: u32 = 0x1005_0122;
pub const NR_INVALID_SOH_LENGTH: u32 = 0x1005_012B;
pub const NR_INVALID_EXT_ATTR_TYPE: u32 = 0x1005_012C;
pub const NR_INVALID_SF_CLASS_TYPE: u32 = 0x1005_0111;

/// Attention identifier codes
pub const AID_F1: i32 = 0x31;
pub const AID_F12: i32 = 0x3C;
pub const AID_F13: i32 = 0xB1;
pub const AID_F24: i32 = 0xBC;
pub const AID_CLEAR: i32 = 0xBD;
pub const AID_ENTER: i32 = 0xF1;
pub const AID_HELP: i32 = 0xF3;
pub const AID_ROLL_DOWN: i32 = 0xF4;
pub const AID_ROLL_UP: i32 = 0xF5;
pub const AID_PRINT: i32 = 0xF6;
pub const AID_RECORD_BS: i32 = 0xF8;

/// Pseudo AIDs: handled without a pending read, never sent as an AID byte
pub const AID_SYSREQ: i32 = -1;
pub const AID_ATTN: i32 = -2;
pub const AID_TESTREQ: i32 = -3;

/// WTD control character 1 (top three bits select the action)
pub const CC1_MASK: u8 = 0xE0;

/// WTD control character 2 bits
pub const CC2_IC_ULOCK: u8 = 0x40;
pub const CC2_CLR_BLINK: u8 = 0x20;
pub const CC2_SET_BLINK: u8 = 0x10;
pub const CC2_UNLOCK: u8 = 0x08;
pub const CC2_ALARM: u8 = 0x04;
pub const CC2_MESSAGE_OFF: u8 = 0x02;
pub const CC2_MESSAGE_ON: u8 = 0x01;

/// Field Attributes
/// C.f. 5494 Functions Reference (SC30-3533-04), Section 15.6.12.3.
/// Bits 0-2 always set to 001 to identify as an attribute byte.
pub const ATTR_5250_GREEN: u8 = 0x20;   // Default
pub const ATTR_5250_WHITE: u8 = 0x22;
pub const ATTR_5250_NONDISP: u8 = 0x27; // Nondisplay
pub const ATTR_5250_RED: u8 = 0x28;
pub const ATTR_5250_TURQ: u8 = 0x30;
pub const ATTR_5250_YELLOW: u8 = 0x32;
pub const ATTR_5250_PINK: u8 = 0x38;
pub const ATTR_5250_BLUE: u8 = 0x3A;

pub const ATTR_5250_NORMAL: u8 = ATTR_5250_GREEN;

/// Keyboard / Error handling states
pub const TN5250_KEYSTATE_UNLOCKED: u8 = 0;
pub const TN5250_KEYSTATE_LOCKED: u8 = 1;
pub const TN5250_KEYSTATE_HARDWARE: u8 = 2;
pub const TN5250_KEYSTATE_PREHELP: u8 = 3;
pub const TN5250_KEYSTATE_POSTHELP: u8 = 4;

/// Keyboard Error Source Codes
pub const TN5250_KBDSRC_NONE: u16 = 0x0000;            // No Error
pub const TN5250_KBDSRC_INVALID_CMD: u16 = 0x0003;     // Bad key following CMD key
pub const TN5250_KBDSRC_DATA_DISALLOWED: u16 = 0x0004; // Keyboard in MSR field
pub const TN5250_KBDSRC_PROTECT: u16 = 0x0005;         // Cursor in protected area
pub const TN5250_KBDSRC_ALPHAONLY: u16 = 0x0008;       // Field Requires Alpha
pub const TN5250_KBDSRC_NUMONLY: u16 = 0x0009;         // Field Requires Numeric
pub const TN5250_KBDSRC_ONLY09: u16 = 0x0010;          // Only chars 0-9 allowed
pub const TN5250_KBDSRC_SIGNPOS: u16 = 0x0011;         // Sign position invalid
pub const TN5250_KBDSRC_NOROOM: u16 = 0x0012;          // No room for insert
pub const TN5250_KBDSRC_FLDM_DISALLOWED: u16 = 0x0016; // Field- Not Allowed
pub const TN5250_KBDSRC_FER: u16 = 0x0018;             // Field Exit Required
pub const TN5250_KBDSRC_DUP_DISALLOWED: u16 = 0x0019;  // Dup Key Not Allowed

/// Operator error text for a keyboard error source code
pub fn kbdsrc_message(code: u16) -> Option<&'static str> {
    match code {
        TN5250_KBDSRC_INVALID_CMD => Some("Key pressed following System Request key was not valid."),
        TN5250_KBDSRC_DATA_DISALLOWED => Some("Entry of data not allowed in this input/output field."),
        TN5250_KBDSRC_PROTECT => Some("Cursor in protected area of display."),
        TN5250_KBDSRC_ALPHAONLY => Some("Field requires alphabetic characters."),
        TN5250_KBDSRC_NUMONLY => Some("Field requires numeric characters."),
        TN5250_KBDSRC_ONLY09 => Some("Only characters 0 through 9 allowed."),
        TN5250_KBDSRC_SIGNPOS => Some("Key for sign position of field not valid."),
        TN5250_KBDSRC_NOROOM => Some("No room to insert data."),
        TN5250_KBDSRC_FLDM_DISALLOWED => Some("Field Minus key not valid in field."),
        TN5250_KBDSRC_FER => Some("Field exit required."),
        TN5250_KBDSRC_DUP_DISALLOWED => Some("Duplicate key or Field Mark key not allowed in field."),
        _ => None,
    }
}

/// Key codes delivered by a terminal. Data keys are 0x20..=0xFF in the
/// local character set; special keys follow the curses numbering.
pub const K_FIRST_SPECIAL: i32 = 0o400;
pub const K_ENTER: i32 = 0x0d;
pub const K_NEWLINE: i32 = 0x200;
pub const K_TAB: i32 = 0x09;
pub const K_BACKTAB: i32 = 0o541;
pub const K_F1: i32 = 0o410 + 1;
pub const K_F12: i32 = 0o410 + 12;
pub const K_F13: i32 = 0o410 + 13;
pub const K_F24: i32 = 0o410 + 24;
pub const K_LEFT: i32 = 0o404;
pub const K_RIGHT: i32 = 0o405;
pub const K_UP: i32 = 0o403;
pub const K_DOWN: i32 = 0o402;
pub const K_ROLLDN: i32 = 0o523;
pub const K_ROLLUP: i32 = 0o522;
pub const K_BACKSPACE: i32 = 0o407;
pub const K_HOME: i32 = 0o406;
pub const K_END: i32 = 0o550;
pub const K_INSERT: i32 = 0o513;
pub const K_DELETE: i32 = 0o512;
pub const K_RESET: i32 = 0o531;
pub const K_PRINT: i32 = 0o532;
pub const K_HELP: i32 = 0o553;
pub const K_SYSREQ: i32 = 0o401;
pub const K_CLEAR: i32 = 0o515;
pub const K_FIELDEXIT: i32 = 0o517;
pub const K_TESTREQ: i32 = 0o516;
pub const K_ATTENTION: i32 = 0o511;
pub const K_DUPLICATE: i32 = 0o524;
pub const K_FIELDMINUS: i32 = 0o526;
pub const K_FIELDPLUS: i32 = 0o520;
pub const K_PREVWORD: i32 = 0o611;
pub const K_NEXTWORD: i32 = 0o622;
pub const K_PREVFLD: i32 = 0xfffb;
pub const K_NEXTFLD: i32 = 0xfffc;
pub const K_FIELDHOME: i32 = 0o607;

/// Function key number (1..=24) to its AID code
pub fn aid_for_function_key(n: i32) -> Option<i32> {
    match n {
        1..=12 => Some(AID_F1 + n - 1),
        13..=24 => Some(AID_F13 + n - 13),
        _ => None,
    }
}

/// Enum representation of 5250 protocol commands for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    ClearUnit = CMD_CLEAR_UNIT as isize,
    ClearUnitAlternate = CMD_CLEAR_UNIT_ALTERNATE as isize,
    ClearFormatTable = CMD_CLEAR_FORMAT_TABLE as isize,
    WriteToDisplay = CMD_WRITE_TO_DISPLAY as isize,
    WriteErrorCode = CMD_WRITE_ERROR_CODE as isize,
    WriteErrorCodeWindow = CMD_WRITE_ERROR_CODE_WINDOW as isize,
    ReadInputFields = CMD_READ_INPUT_FIELDS as isize,
    ReadMdtFields = CMD_READ_MDT_FIELDS as isize,
    ReadMdtFieldsAlt = CMD_READ_MDT_FIELDS_ALT as isize,
    ReadScreenImmediate = CMD_READ_SCREEN_IMMEDIATE as isize,
    ReadScreenExtended = CMD_READ_SCREEN_EXTENDED as isize,
    ReadScreenPrint = CMD_READ_SCREEN_PRINT as isize,
    ReadScreenPrintExtended = CMD_READ_SCREEN_PRINT_EXTENDED as isize,
    ReadScreenPrintGrid = CMD_READ_SCREEN_PRINT_GRID as isize,
    ReadScreenPrintExtGrid = CMD_READ_SCREEN_PRINT_EXT_GRID as isize,
    ReadImmediate = CMD_READ_IMMEDIATE as isize,
    ReadImmediateAlt = CMD_READ_IMMEDIATE_ALT as isize,
    SaveScreen = CMD_SAVE_SCREEN as isize,
    SavePartialScreen = CMD_SAVE_PARTIAL_SCREEN as isize,
    RestoreScreen = CMD_RESTORE_SCREEN as isize,
    RestorePartialScreen = CMD_RESTORE_PARTIAL_SCREEN as isize,
    Roll = CMD_ROLL as isize,
    WriteStructuredField = CMD_WRITE_STRUCTURED_FIELD as isize,
    Undocumented0A = CMD_UNDOCUMENTED_0A as isize,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            CMD_CLEAR_UNIT => Some(Self::ClearUnit),
            CMD_CLEAR_UNIT_ALTERNATE => Some(Self::ClearUnitAlternate),
            CMD_CLEAR_FORMAT_TABLE => Some(Self::ClearFormatTable),
            CMD_WRITE_TO_DISPLAY => Some(Self::WriteToDisplay),
            CMD_WRITE_ERROR_CODE => Some(Self::WriteErrorCode),
            CMD_WRITE_ERROR_CODE_WINDOW => Some(Self::WriteErrorCodeWindow),
            CMD_READ_INPUT_FIELDS => Some(Self::ReadInputFields),
            CMD_READ_MDT_FIELDS => Some(Self::ReadMdtFields),
            CMD_READ_MDT_FIELDS_ALT => Some(Self::ReadMdtFieldsAlt),
            CMD_READ_SCREEN_IMMEDIATE => Some(Self::ReadScreenImmediate),
            CMD_READ_SCREEN_EXTENDED => Some(Self::ReadScreenExtended),
            CMD_READ_SCREEN_PRINT => Some(Self::ReadScreenPrint),
            CMD_READ_SCREEN_PRINT_EXTENDED => Some(Self::ReadScreenPrintExtended),
            CMD_READ_SCREEN_PRINT_GRID => Some(Self::ReadScreenPrintGrid),
            CMD_READ_SCREEN_PRINT_EXT_GRID => Some(Self::ReadScreenPrintExtGrid),
            CMD_READ_IMMEDIATE => Some(Self::ReadImmediate),
            CMD_READ_IMMEDIATE_ALT => Some(Self::ReadImmediateAlt),
            CMD_SAVE_SCREEN => Some(Self::SaveScreen),
            CMD_SAVE_PARTIAL_SCREEN => Some(Self::SavePartialScreen),
            CMD_RESTORE_SCREEN => Some(Self::RestoreScreen),
            CMD_RESTORE_PARTIAL_SCREEN => Some(Self::RestorePartialScreen),
            CMD_ROLL => Some(Self::Roll),
            CMD_WRITE_STRUCTURED_FIELD => Some(Self::WriteStructuredField),
            CMD_UNDOCUMENTED_0A => Some(Self::Undocumented0A),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Enum representation of the orders that may appear inside a WTD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCode {
    StartOfHeader = SOH as isize,
    RepeatToAddress = RA as isize,
    EraseToAddress = EA as isize,
    TransparentData = TD as isize,
    SetBufferAddress = SBA as isize,
    WriteExtendedAttribute = WEA as isize,
    InsertCursor = IC as isize,
    MoveCursor = MC as isize,
    WriteStructuredField = WDSF as isize,
    StartOfField = SF as isize,
}

impl OrderCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SOH => Some(Self::StartOfHeader),
            RA => Some(Self::RepeatToAddress),
            EA => Some(Self::EraseToAddress),
            TD => Some(Self::TransparentData),
            SBA => Some(Self::SetBufferAddress),
            WEA => Some(Self::WriteExtendedAttribute),
            IC => Some(Self::InsertCursor),
            MC => Some(Self::MoveCursor),
            WDSF => Some(Self::WriteStructuredField),
            SF => Some(Self::StartOfField),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_conversion() {
        assert_eq!(CommandCode::from_u8(CMD_WRITE_TO_DISPLAY), Some(CommandCode::WriteToDisplay));
        assert_eq!(CommandCode::WriteToDisplay.to_u8(), CMD_WRITE_TO_DISPLAY);
        assert_eq!(CommandCode::from_u8(0xFF), None);
    }

    #[test]
    fn test_order_code_conversion() {
        assert_eq!(OrderCode::from_u8(WDSF), Some(OrderCode::WriteStructuredField));
        assert_eq!(OrderCode::MoveCursor.to_u8(), MC);
        assert_eq!(OrderCode::from_u8(0x40), None);
    }

    #[test]
    fn test_function_key_aids() {
        assert_eq!(aid_for_function_key(1), Some(0x31));
        assert_eq!(aid_for_function_key(12), Some(0x3C));
        assert_eq!(aid_for_function_key(13), Some(0xB1));
        assert_eq!(aid_for_function_key(24), Some(0xBC));
        assert_eq!(aid_for_function_key(25), None);
    }

    #[test]
    fn test_key_code_layout() {
        assert_eq!(K_F1, 0x109);
        assert_eq!(K_F24 - K_F1, 23);
        assert!(K_SYSREQ >= K_FIRST_SPECIAL);
    }

    #[test]
    fn test_kbdsrc_messages() {
        assert!(kbdsrc_message(TN5250_KBDSRC_PROTECT).is_some());
        assert_eq!(kbdsrc_message(TN5250_KBDSRC_NONE), None);
    }
}
