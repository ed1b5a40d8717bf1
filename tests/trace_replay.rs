use std::io::Write;

use tempfile::NamedTempFile;

use tn5250_core::config::SessionConfig;
use tn5250_core::lib5250::codes::*;
use tn5250_core::lib5250::telnet::build_record;
use tn5250_core::lib5250::{DebugStream, NullTerminal, Record, Session, StreamHeader};
use tn5250_core::protocol_common::CharMap;

/// Sign-on style screen: a title, one 10 byte input field on row 6 and a
/// pending Read MDT Fields.
fn signon_payload() -> Vec<u8> {
    let map = CharMap::cp037();
    let mut data = vec![ESC, CMD_CLEAR_UNIT, ESC, CMD_WRITE_TO_DISPLAY, 0x00, CC2_UNLOCK];
    data.extend_from_slice(&[SBA, 1, 30]);
    data.extend(map.str_to_remote("Sign On"));
    data.extend_from_slice(&[SBA, 6, 10]);
    data.extend(map.str_to_remote("User"));
    data.extend_from_slice(&[SBA, 6, 20, SF, 0x40, 0x00, 0x24, 0x00, 0x0A]);
    data.extend_from_slice(&[ESC, CMD_READ_MDT_FIELDS, 0x00, 0x00]);
    data
}

fn trace_text(records: &[Vec<u8>], keys: &[i32]) -> String {
    let mut text = String::from("tn5250 trace\n");
    for data in records {
        text.push_str(&Record::from_bytes(data.clone()).dump());
    }
    for key in keys {
        text.push_str(&format!("@key {key}\n"));
    }
    text
}

fn write_trace(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write trace");
    file.flush().expect("flush trace");
    file
}

fn signon_record() -> Vec<u8> {
    build_record(StreamHeader::new(FLOW_DISPLAY, H_NONE, OPCODE_PUT_GET), &signon_payload())
}

#[test]
fn replay_draws_the_screen() {
    let file = write_trace(&trace_text(&[signon_record()], &[]));
    let stream = DebugStream::open(file.path()).expect("open trace");
    let mut session = Session::new(stream, SessionConfig::default()).unwrap();
    let terminal = NullTerminal::default();
    let stats = terminal.stats();
    session.set_terminal(Box::new(terminal)).unwrap();

    session.main_loop().unwrap();

    let screen = session.display().screen_text();
    assert_eq!(&screen[0][29..36], "Sign On");
    assert_eq!(&screen[5][9..13], "User");
    assert_eq!((session.display().cursor_y(), session.display().cursor_x()), (5, 20));
    assert_eq!(session.read_opcode(), CMD_READ_MDT_FIELDS);
    assert!(session.stream().sent().is_empty());
    assert!(stats.updates.get() > 0);
}

#[test]
fn replay_with_keys_answers_the_read() {
    let mut keys: Vec<i32> = "QSECOFR".bytes().map(i32::from).collect();
    keys.push(K_ENTER);
    let file = write_trace(&trace_text(&[signon_record()], &keys));

    let stream = DebugStream::open(file.path()).expect("open trace");
    let mut session = Session::new(stream, SessionConfig::default()).unwrap();
    session.main_loop().unwrap();

    let sent = session.stream().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].opcode(), OPCODE_PUT_GET);

    let map = CharMap::cp037();
    let mut expected = vec![6, 28, AID_ENTER as u8, SBA, 6, 21];
    expected.extend(map.str_to_remote("QSECOFR"));
    assert_eq!(sent[0].payload(), &expected[..]);
}

#[test]
fn dump_of_a_replayed_record_reads_back() {
    let file = write_trace(&trace_text(&[signon_record(), signon_record()], &[13]));
    let reread = tn5250_core::lib5250::parse_trace(std::io::BufReader::new(file.reopen().unwrap())).unwrap();
    assert_eq!(reread.len(), 3);

    let stream = DebugStream::from_events(reread);
    assert_eq!(stream.pending_events(), 3);
}

#[test]
fn malformed_trace_is_rejected() {
    let file = write_trace("@record +0000 zz00\n@eor\n");
    let err = DebugStream::open(file.path()).unwrap_err();
    assert!(err.to_string().contains("line 1"), "{err}");
}

#[test]
fn config_file_selects_the_device() {
    let mut config = SessionConfig::default();
    config.set("env.TERM", "IBM-3477-FC");
    config.set("timeout", 5i64);
    let json = config.to_json().unwrap();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let loaded = SessionConfig::load(file.path()).unwrap();
    assert_eq!(loaded.terminal_type(), "IBM-3477-FC");

    let query = [ESC, CMD_WRITE_STRUCTURED_FIELD, 0x00, 0x05, SF_CLASS_5250, SF_5250_QUERY, 0x00];
    let mut stream = DebugStream::new();
    stream.push_record(build_record(StreamHeader::new(FLOW_DISPLAY, H_NONE, OPCODE_PUT_GET), &query));
    let mut session = Session::new(stream, loaded).unwrap();
    session.main_loop().unwrap();

    let reply = session.stream().sent()[0].payload().to_vec();
    assert_eq!(&reply[30..34], &CharMap::cp037().str_to_remote("3477")[..]);
}
