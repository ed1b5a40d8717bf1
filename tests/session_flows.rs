use tn5250_core::config::SessionConfig;
use tn5250_core::lib5250::codes::*;
use tn5250_core::lib5250::telnet::build_record;
use tn5250_core::lib5250::{DebugStream, NullTerminal, Record, Session, StreamHeader};
use tn5250_core::protocol_common::CharMap;

fn new_session() -> Session<DebugStream> {
    Session::new(DebugStream::new(), SessionConfig::default()).unwrap()
}

fn host(session: &mut Session<DebugStream>, opcode: u8, payload: &[u8]) {
    let record = Record::from_bytes(build_record(StreamHeader::new(FLOW_DISPLAY, H_NONE, opcode), payload));
    session.handle_record(record).unwrap();
}

fn keys(session: &mut Session<DebugStream>, keys: &[i32]) {
    for &key in keys {
        session.display_mut().queue_key(key);
    }
    session.do_keys().unwrap();
}

/// Clear, one numeric-only field at row 2 col 11 and a pending Read Input Fields
fn numeric_screen() -> Vec<u8> {
    vec![
        ESC, CMD_CLEAR_UNIT,
        ESC, CMD_WRITE_TO_DISPLAY, 0x00, CC2_UNLOCK,
        SBA, 2, 10, SF, 0x43, 0x00, 0x24, 0x00, 0x04,
        ESC, CMD_READ_INPUT_FIELDS, 0x00, 0x00,
    ]
}

#[test]
fn operator_error_then_help_reports_the_error_code() {
    let mut session = new_session();
    host(&mut session, OPCODE_PUT_GET, &numeric_screen());

    // A letter in a numeric-only field is an operator error
    keys(&mut session, &[b'X' as i32]);
    assert_eq!(session.display().keystate(), TN5250_KEYSTATE_PREHELP);
    assert_eq!(session.display().key_src(), TN5250_KBDSRC_NUMONLY);
    assert!(session.display().inhibited());
    assert_eq!(session.display().dbuffer().field_data(0), &[0, 0, 0, 0]);

    keys(&mut session, &[K_HELP]);
    let sent = session.stream_mut().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].flags(), H_HLP);
    assert_eq!(sent[0].payload(), &TN5250_KBDSRC_NUMONLY.to_be_bytes());
    assert_eq!(session.display().keystate(), TN5250_KEYSTATE_POSTHELP);

    // Reset clears the error and the field accepts digits again
    keys(&mut session, &[K_RESET, b'4' as i32, b'2' as i32]);
    assert_eq!(session.display().keystate(), TN5250_KEYSTATE_UNLOCKED);
    assert_eq!(session.display().dbuffer().field_data(0), &[0xF4, 0xF2, 0, 0]);
}

#[test]
fn session_recovers_after_a_negative_response() {
    let mut session = new_session();
    host(&mut session, OPCODE_PUT_GET, &[ESC, CMD_CLEAR_UNIT, ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, SBA, 30, 1]);
    let sent = session.stream_mut().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].flags(), H_ERR);
    assert_eq!(sent[0].payload(), &NR_INVALID_ROW_COL_ADDR.to_be_bytes());

    host(&mut session, OPCODE_PUT_GET, &numeric_screen());
    assert_eq!(session.display().dbuffer().field_count(), 1);
    assert_eq!(session.read_opcode(), CMD_READ_INPUT_FIELDS);
    assert!(session.stream().sent().is_empty());
}

#[test]
fn save_and_restore_through_the_host() {
    let map = CharMap::cp037();
    let mut session = new_session();
    let mut screen = numeric_screen();
    screen.truncate(screen.len() - 4);
    screen.extend_from_slice(&[ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, SBA, 10, 5]);
    screen.extend(map.str_to_remote("Main Menu"));
    host(&mut session, OPCODE_PUT_GET, &screen);
    let before = session.display().dbuffer().data().to_vec();

    host(&mut session, OPCODE_SAVE_SCR, &[ESC, CMD_SAVE_SCREEN]);
    let saved = session.stream_mut().take_sent().remove(0);
    assert_eq!(saved.opcode(), OPCODE_SAVE_SCR);

    // A pop-up replaces the screen, then the host plays the save back
    host(&mut session, OPCODE_PUT_GET, &[ESC, CMD_CLEAR_UNIT]);
    assert_eq!(session.display().dbuffer().field_count(), 0);
    host(&mut session, OPCODE_RESTORE_SCR, saved.payload());

    assert_eq!(session.display().dbuffer().data(), &before[..]);
    assert_eq!(session.display().dbuffer().field_count(), 1);
    assert_eq!(&session.display().screen_text()[9][4..13], "Main Menu");
}

#[test]
fn clear_unit_destroys_gui_constructs() {
    let mut session = new_session();
    let terminal = NullTerminal::default().with_enhanced(true);
    let stats = terminal.stats();
    session.set_terminal(Box::new(terminal)).unwrap();

    let mut data = vec![ESC, CMD_CLEAR_UNIT, ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00];
    // Window of 6 rows by 30 columns at row 3 col 5
    data.extend_from_slice(&[SBA, 3, 5, WDSF, 0x00, 0x09, SF_CLASS_5250, CREATE_WINDOW, 0x00, 0x00, 0x00, 6, 30]);
    // Vertical scroll bar over 50 rows
    data.extend_from_slice(&[WDSF, 0x00, 0x08, SF_CLASS_5250, DEFINE_SCROLL_BAR_FIELD, 0x00, 0x00, 50, 0]);
    host(&mut session, OPCODE_PUT_GET, &data);

    assert_eq!(session.display().dbuffer().windows().len(), 1);
    assert_eq!(session.display().dbuffer().scrollbars().len(), 1);
    assert_eq!((stats.windows.get(), stats.scrollbars.get()), (1, 1));

    host(&mut session, OPCODE_PUT_GET, &[ESC, CMD_CLEAR_UNIT]);
    assert!(session.display().dbuffer().windows().is_empty());
    assert!(session.display().dbuffer().scrollbars().is_empty());
    assert_eq!((stats.windows.get(), stats.scrollbars.get()), (0, 0));
}

#[test]
fn attention_overtakes_held_type_ahead() {
    let mut session = new_session();
    // Alpha field at row 1 col 2, keyboard left locked
    host(
        &mut session,
        OPCODE_PUT_GET,
        &[ESC, CMD_CLEAR_UNIT, ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, SBA, 1, 1, SF, 0x40, 0x00, 0x20, 0x00, 0x05, MC, 1, 2],
    );
    assert_eq!(session.display().keystate(), TN5250_KEYSTATE_LOCKED);

    keys(&mut session, &[b'A' as i32]);
    assert_eq!(session.display().queued_keys(), 1);
    assert!(session.stream().sent().is_empty());

    // Attention goes out ahead of the held key, which then lands once
    // the keyboard is unlocked
    keys(&mut session, &[K_ATTENTION]);
    let sent = session.stream_mut().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].flags(), H_ATN);
    assert!(sent[0].payload().is_empty());
    assert_eq!(session.display().queued_keys(), 0);
    assert_eq!(session.display().dbuffer().field_data(0)[0], 0xC1);
}

#[test]
fn host_write_clears_a_pending_error() {
    let map = CharMap::cp037();
    let mut session = new_session();
    host(&mut session, OPCODE_PUT_GET, &numeric_screen());

    let mut error = vec![ESC, CMD_WRITE_ERROR_CODE];
    error.extend(map.str_to_remote("Enter a number"));
    host(&mut session, OPCODE_PUT_GET, &error);
    assert_eq!(session.display().keystate(), TN5250_KEYSTATE_POSTHELP);

    // Lock with CC1, unlock with CC2: the operator can type again
    host(&mut session, OPCODE_PUT_GET, &[ESC, CMD_WRITE_TO_DISPLAY, 0x20, CC2_UNLOCK]);
    assert_eq!(session.display().keystate(), TN5250_KEYSTATE_UNLOCKED);
    keys(&mut session, &[b'7' as i32]);
    assert_eq!(session.display().dbuffer().field_data(0)[0], 0xF7);
}
