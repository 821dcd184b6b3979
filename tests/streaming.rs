//! End-to-end handshake and streaming scenarios driven through `Session`.

use chords_bridge::protocol::{END_BYTE, SYNC_BYTE_1, SYNC_BYTE_2};
use chords_bridge::{
    Command, ConnectionStatus, Effect, OutboundMessage, RetryTicket, Session, SessionConfig, Stage,
};

fn frame(channels: &[u16]) -> Vec<u8> {
    let mut out = vec![SYNC_BYTE_1, SYNC_BYTE_2, 0x00];
    for v in channels {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.push(END_BYTE);
    out
}

fn writes(effects: &[Effect]) -> Vec<Command> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Write(cmd) => Some(*cmd),
            _ => None,
        })
        .collect()
}

fn ecg_values(effects: &[Effect]) -> Vec<u16> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Publish(OutboundMessage::Ecg { ecg_value, .. }) => Some(*ecg_value),
            _ => None,
        })
        .collect()
}

fn last_ticket(effects: &[Effect]) -> Option<RetryTicket> {
    effects.iter().rev().find_map(|e| match e {
        Effect::ArmRetry(ticket, _) => Some(*ticket),
        _ => None,
    })
}

fn open_streaming(board: &str) -> Session {
    let mut session = Session::new("/dev/ttyACM0", SessionConfig::default(), 0);
    session.on_open();
    session.on_bytes(format!("{board}\n").as_bytes(), 0);
    session.on_bytes(b"RUNNING\n", 0);
    session
}

#[test]
fn uno_handshake_then_frame_decode() {
    let mut session = Session::new("/dev/ttyACM0", SessionConfig::default(), 0);

    let effects = session.on_open();
    assert_eq!(writes(&effects), vec![Command::Stop, Command::Whoru]);
    assert_eq!(session.stage(), Stage::AwaitingBoard);

    let effects = session.on_bytes(b"UNO-R3\r\n", 0);
    assert_eq!(session.packet_len(), 6 * 2 + 3 + 1);
    assert_eq!(writes(&effects), vec![Command::Start]);
    assert!(effects.contains(&Effect::Publish(OutboundMessage::ConnectionStatus(
        ConnectionStatus::connected("/dev/ttyACM0", "Connected to UNO-R3")
    ))));

    session.on_bytes(b"RUNNING\n", 0);
    assert_eq!(session.stage(), Stage::Streaming);

    let bytes = frame(&[100, 200, 300, 400, 500, 600]);
    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[..2], &[0xC7, 0x7C]);
    assert_eq!(bytes[15], 0x01);

    let effects = session.on_bytes(&bytes, 10);
    assert_eq!(ecg_values(&effects), vec![100]);
    assert_eq!(
        session.last_samples().unwrap().values,
        vec![100, 200, 300, 400, 500, 600]
    );
}

#[test]
fn chunk_boundaries_do_not_change_output() {
    let mut stream = vec![0x42, SYNC_BYTE_1];
    for i in 0..20u16 {
        stream.extend(frame(&[i, i + 1, i + 2, i + 3, i + 4, i + 5]));
        if i % 3 == 0 {
            stream.extend_from_slice(&[SYNC_BYTE_1, 0x00, END_BYTE]);
        }
    }

    let mut whole = open_streaming("UNO-R3");
    let all_at_once = ecg_values(&whole.on_bytes(&stream, 0));

    let mut split = open_streaming("UNO-R3");
    let mut byte_by_byte = Vec::new();
    for b in &stream {
        byte_by_byte.extend(ecg_values(&split.on_bytes(std::slice::from_ref(b), 0)));
    }

    let mut chunked = open_streaming("UNO-R3");
    let mut odd_chunks = Vec::new();
    for chunk in stream.chunks(7) {
        odd_chunks.extend(ecg_values(&chunked.on_bytes(chunk, 0)));
    }

    assert_eq!(all_at_once, (0..20).collect::<Vec<u16>>());
    assert_eq!(byte_by_byte, all_at_once);
    assert_eq!(odd_chunks, all_at_once);
    assert!(whole.buffered_bytes() < whole.packet_len());
    assert!(split.buffered_bytes() < split.packet_len());
}

#[test]
fn heart_rate_reaches_75_bpm() {
    let mut session = open_streaming("NANO-CLASSIC");
    let mut last_rate = 0;
    let mut t = 0u64;
    while t <= 8 * 800 + 100 {
        t += 4;
        let value = if t % 800 == 0 { 3000 } else { 1500 };
        let effects = session.on_bytes(&frame(&[value, 0, 0, 0, 0, 0, 0, 0]), t);
        for effect in &effects {
            if let Effect::Publish(OutboundMessage::Vitals { data }) = effect {
                last_rate = data.heart_rate;
            }
        }
    }
    assert!(last_rate.abs_diff(75) <= 1, "got {last_rate} BPM");
    assert_eq!(session.vitals().heart_rate, last_rate);
}

#[test]
fn stopped_board_is_restarted() {
    let mut session = Session::new("COM5", SessionConfig::default(), 0);
    session.on_open();
    session.on_bytes(b"MAKER-NANO\n", 0);
    let effects = session.on_bytes(b"STOPPED\n", 0);
    assert_eq!(writes(&effects), vec![Command::Start]);
    session.on_bytes(b"RUNNING\n", 0);
    assert_eq!(session.stage(), Stage::Streaming);
}

#[test]
fn silent_board_retries_forever() {
    let mut session = Session::new("COM5", SessionConfig::default(), 0);
    let mut ticket = last_ticket(&session.on_open()).unwrap();
    for _ in 0..50 {
        let effects = session.on_retry_due(ticket);
        assert_eq!(writes(&effects), vec![Command::Whoru]);
        ticket = last_ticket(&effects).unwrap();
    }
    assert_eq!(session.stage(), Stage::AwaitingBoard);
}

#[test]
fn disconnect_mid_stream_disarms_timers() {
    let mut session = Session::new("COM5", SessionConfig::default(), 0);
    session.on_open();
    let pending = last_ticket(&session.on_bytes(b"UNO-R3\n", 0)).unwrap();

    let effects = session.on_disconnect();
    assert_eq!(writes(&effects), vec![Command::Stop]);
    assert!(effects.contains(&Effect::CancelRetry));

    // The timer raced the disconnect and fired anyway.
    assert!(session.on_retry_due(pending).is_empty());
    assert_eq!(session.stage(), Stage::Idle);
    assert!(!session.retry_armed());
}
