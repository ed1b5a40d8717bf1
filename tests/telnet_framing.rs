use proptest::prelude::*;

use tn5250_core::lib5250::codes::*;
use tn5250_core::lib5250::telnet::{
    build_record, encode_packet, escape, unescape, StreamHeader, TelnetParser, DO, EOR, IAC, TERMINAL_TYPE, WILL,
};

fn header(opcode: u8) -> StreamHeader {
    StreamHeader::new(FLOW_DISPLAY, H_NONE, opcode)
}

proptest! {
    #[test]
    fn escape_round_trips(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let escaped = escape(&data);
        prop_assert_eq!(unescape(&escaped), data.clone());
        let iacs = data.iter().filter(|&&b| b == IAC).count();
        prop_assert_eq!(escaped.len(), data.len() + iacs);
    }

    #[test]
    fn packets_survive_arbitrary_splits(
        payload in proptest::collection::vec(any::<u8>(), 0..300),
        split in 0usize..400,
    ) {
        let wire = encode_packet(header(OPCODE_PUT_GET), &payload);
        let split = split.min(wire.len());

        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.feed(&wire[..split]);
        parser.feed(&wire[split..]);

        let record = parser.pop_record().expect("one record");
        prop_assert_eq!(record.data(), &build_record(header(OPCODE_PUT_GET), &payload)[..]);
        prop_assert_eq!(record.payload(), &payload[..]);
        prop_assert!(parser.pop_record().is_none());
        prop_assert!(parser.take_replies().is_empty());
    }

    #[test]
    fn back_to_back_packets_stay_separate(
        first in proptest::collection::vec(any::<u8>(), 0..64),
        second in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut wire = encode_packet(header(OPCODE_INVITE), &first);
        wire.extend(encode_packet(header(OPCODE_OUTPUT_ONLY), &second));

        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.feed(&wire);
        prop_assert_eq!(parser.record_count(), 2);
        let a = parser.pop_record().expect("first record");
        let b = parser.pop_record().expect("second record");
        prop_assert_eq!(a.opcode(), OPCODE_INVITE);
        prop_assert_eq!(a.payload(), &first[..]);
        prop_assert_eq!(b.opcode(), OPCODE_OUTPUT_ONLY);
        prop_assert_eq!(b.payload(), &second[..]);
    }
}

#[test]
fn negotiation_interleaved_with_data() {
    let mut parser = TelnetParser::new("IBM-3477-FC");

    // Host asks for the terminal type option, then sends a record
    let mut wire = vec![IAC, DO, TERMINAL_TYPE];
    wire.extend(encode_packet(header(OPCODE_PUT_GET), &[ESC, CMD_CLEAR_UNIT]));
    parser.feed(&wire);

    let replies = parser.take_replies();
    assert_eq!(replies, vec![IAC, WILL, TERMINAL_TYPE]);
    let record = parser.pop_record().expect("record after negotiation");
    assert_eq!(record.payload(), &[ESC, CMD_CLEAR_UNIT]);
}

#[test]
fn record_header_length_and_eor_marker() {
    let wire = encode_packet(header(OPCODE_NO_OP), &[IAC]);
    // 10 byte header, the IAC doubled, then IAC EOR
    assert_eq!(wire.len(), 10 + 2 + 2);
    assert_eq!(&wire[wire.len() - 2..], &[IAC, EOR]);
    assert_eq!(&wire[..2], &[0x00, 0x0B]);
}
