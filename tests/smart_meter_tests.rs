//! Tests for the smart meter driver, run against a scripted dongle on an
//! in-memory pipe with the tokio clock paused.

use broute_rs::constants::{EOJ_SMART_METER, EPC_INSTANTANEOUS_POWER, EPC_MANUFACTURER_CODE};
use broute_rs::echonet::{Found, Tid};
use broute_rs::util::decode_hex;
use broute_rs::wisun::session::Notification;
use broute_rs::{DongleKind, PanDescriptor, SessionConfig, SessionState, SmartMeter, SmartMeterError, SmartMeterHandle};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, Split, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

const METER: &str = "FE80:0000:0000:0000:021C:6400:03EF:EDFD";
const LOCAL: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";

/// The far end of the pipe, playing an RL7023 Stick-D.
struct Dongle {
    lines: Split<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Dongle {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Dongle {
            lines: BufReader::new(reader).split(b'\n'),
            writer,
        }
    }

    /// Next line written by the driver, without its CR/LF; `None` once the port is closed.
    async fn next_line(&mut self) -> Option<Vec<u8>> {
        let mut line = self.lines.next_segment().await.unwrap()?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    async fn command(&mut self) -> String {
        let line = self.next_line().await.expect("port closed");
        String::from_utf8_lossy(&line).into_owned()
    }

    async fn reply(&mut self, text: &str) {
        self.reply_bytes(text.as_bytes()).await;
    }

    async fn reply_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

fn config() -> SessionConfig {
    let mut config = SessionConfig::new("00112233445566778899AABBCCDDEEFF", "0123456789AB");
    let mut pan = PanDescriptor::default();
    pan.accumulate("Channel:21\r\nPan ID:8888\r\nAddr:001C640003EFEDFD");
    config.pan = Some(pan);
    config.connect_timeout_ms = 5_000;
    config.observation_dispersion_ms = 0;
    config
}

fn erxudp(frame: &str) -> String {
    format!(
        "ERXUDP {METER} {LOCAL} 0E1A 0E1A 001C640003EFEDFD 1 {:04X} {frame}\r\n",
        frame.len() / 2
    )
}

/// Answers the bootstrap up to the join request.
async fn answer_until_join(dongle: &mut Dongle) {
    for expected in [
        "SKSREG SFE 0",
        "SKSETPWD C 0123456789AB",
        "SKSETRBID 00112233445566778899AABBCCDDEEFF",
        "SKSREG S2 21",
        "SKSREG S3 8888",
    ] {
        assert_eq!(dongle.command().await, expected);
        dongle.reply("OK\r\n").await;
    }
    assert_eq!(dongle.command().await, "SKLL64 001C640003EFEDFD");
    dongle.reply(&format!("{METER}\r\n")).await;
    assert_eq!(dongle.command().await, format!("SKJOIN {METER}"));
    dongle.reply("OK\r\n").await;
}

/// Spawns a driver and scripts the dongle until the session is available.
async fn available(config: SessionConfig) -> (SmartMeterHandle, UnboundedReceiver<Notification>, Dongle) {
    let (port, remote) = tokio::io::duplex(4096);
    let (meter, mut notes) = SmartMeter::spawn(port, config);
    let mut dongle = Dongle::new(remote);

    answer_until_join(&mut dongle).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    dongle
        .reply(&format!("EVENT 21 {METER} 02\r\nEVENT 25 {METER}\r\n"))
        .await;

    let note = notes.recv().await.unwrap();
    assert_eq!(note.status.state, SessionState::Available);
    assert!(note.error.is_none());
    assert!(note.frame.is_none());
    (meter, notes, dongle)
}

/// Tests that a full bootstrap with a known PAN ends in an available session.
#[tokio::test(start_paused = true)]
async fn test_bootstrap_reaches_available() {
    let (meter, _notes, _dongle) = available(config()).await;
    assert_eq!(meter.state().await.unwrap(), SessionState::Available);
    assert_eq!(meter.peer_address().await.unwrap().as_deref(), Some(METER));
    assert_eq!(meter.pan().await.unwrap().pan_id.as_deref(), Some("8888"));
}

/// Tests that the bootstrap scans when no channel is known.
#[tokio::test(start_paused = true)]
async fn test_bootstrap_scans_for_pan() {
    let mut config = config();
    config.pan = None;
    let (port, remote) = tokio::io::duplex(4096);
    let (meter, _notes) = SmartMeter::spawn(port, config);
    let mut dongle = Dongle::new(remote);

    for _ in 0..3 {
        dongle.command().await;
        dongle.reply("OK\r\n").await;
    }
    assert_eq!(dongle.command().await, "SKSCAN 2 FFFFFFFF 6");
    dongle.reply("OK\r\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    dongle
        .reply(&format!(
            "EVENT 20 {METER} 0\r\nEPANDESC\r\n  Channel:21\r\n  Channel Page:09\r\n  Pan ID:8888\r\n  Addr:001C640003EFEDFD\r\n  LQI:E1\r\n  PairID:00AABBCC\r\nEVENT 22 {METER} 0\r\n"
        ))
        .await;

    assert_eq!(dongle.command().await, "SKSREG S2 21");
    let pan = meter.pan().await.unwrap();
    assert_eq!(pan.address.as_deref(), Some("001C640003EFEDFD"));
    assert_eq!(pan.lqi.as_deref(), Some("E1"));
}

/// Tests that a GET is framed for the dongle and the answer lands in the registry.
#[tokio::test(start_paused = true)]
async fn test_get_e7_and_delivery() {
    let (meter, mut notes, mut dongle) = available(config()).await;

    assert_eq!(meter.get_e7().await.unwrap(), Tid([0x00, 0x01]));
    let mut expected = format!("SKSENDTO 1 {METER} 0E1A 1 000E ").into_bytes();
    expected.extend(decode_hex("1081000105FF010288016201E700").unwrap());
    assert_eq!(dongle.next_line().await.unwrap(), expected);

    dongle.reply("OK\r\n").await;
    dongle.reply(&erxudp("1081000102880105FF017201E704000001F4")).await;

    let note = notes.recv().await.unwrap();
    assert!(note.error.is_none());
    assert_eq!(note.peer.map(|p| p.address), Some(METER.to_string()));
    let frame = note.frame.unwrap();
    assert_eq!(frame.as_data().unwrap().esv, 0x72);

    let found = meter
        .search(METER, Some(EOJ_SMART_METER.into()), Some(EPC_INSTANTANEOUS_POWER))
        .await
        .unwrap();
    assert_eq!(found, Some(Found::Value("000001f4".to_string())));
    assert!(meter.snapshot().await.unwrap().contains(r#""E7":"000001f4""#));
}

/// Tests that an echoed request never overwrites a cached value.
#[tokio::test(start_paused = true)]
async fn test_request_echo_does_not_update_registry() {
    let (meter, mut notes, mut dongle) = available(config()).await;

    dongle.reply(&erxudp("1081000102880105FF017201E704000001F4")).await;
    notes.recv().await.unwrap();
    for esv in ["62", "63", "71"] {
        dongle
            .reply(&erxudp(&format!("1081000202880105FF01{esv}01E70400000FFF")))
            .await;
        let note = notes.recv().await.unwrap();
        assert!(note.frame.is_some());
    }

    let found = meter
        .search(METER, Some(EOJ_SMART_METER.into()), Some(EPC_INSTANTANEOUS_POWER))
        .await
        .unwrap();
    assert_eq!(found, Some(Found::Value("000001f4".to_string())));
}

/// Tests that a BP35C0 payload ending in CR/LF survives a read that stops inside it.
#[tokio::test(start_paused = true)]
async fn test_raw_payload_split_across_reads() {
    let mut config = config();
    config.dongle = DongleKind::Bp35c0;
    let (meter, mut notes, mut dongle) = available(config).await;

    let payload = [
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xFF, 0x01, 0x72, 0x01, 0xE7, 0x04, 0x00, 0x00, 0x0D, 0x0A,
    ];
    let mut first = format!(
        "ERXUDP {METER} {LOCAL} 0E1A 0E1A 001C640003EFEDFD 8A 1 0 {:04X} ",
        payload.len()
    )
    .into_bytes();
    first.extend_from_slice(&payload);
    dongle.reply_bytes(&first).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    dongle.reply("\r\n").await;

    let note = notes.recv().await.unwrap();
    assert!(note.error.is_none());
    assert_eq!(note.frame.unwrap().as_data().unwrap().esv, 0x72);
    let found = meter
        .search(METER, Some(EOJ_SMART_METER.into()), Some(EPC_INSTANTANEOUS_POWER))
        .await
        .unwrap();
    assert_eq!(found, Some(Found::Value("00000d0a".to_string())));
    assert!(tokio::time::timeout(Duration::from_secs(1), notes.recv()).await.is_err());
}

/// Tests that requests are refused before the session is available.
#[tokio::test(start_paused = true)]
async fn test_requests_need_available_session() {
    let (port, _remote) = tokio::io::duplex(4096);
    let (meter, _notes) = SmartMeter::spawn(port, config());

    assert!(matches!(
        meter.get_e7().await,
        Err(SmartMeterError::NotAvailable(SessionState::SetEcho))
    ));
    assert!(matches!(
        meter.start_observation(Duration::from_secs(1)).await,
        Err(SmartMeterError::NotAvailable(SessionState::SetEcho))
    ));
}

/// Tests that connect timeouts retry the join and finally fail the session.
#[tokio::test(start_paused = true)]
async fn test_connect_timeout_exhausts_retries() {
    let mut config = config();
    config.join_retries = 1;
    let (port, remote) = tokio::io::duplex(4096);
    let (meter, mut notes) = SmartMeter::spawn(port, config);
    let mut dongle = Dongle::new(remote);

    answer_until_join(&mut dongle).await;
    let joined = Instant::now();

    assert_eq!(dongle.command().await, "SKINFO");
    assert_eq!(dongle.command().await, format!("SKJOIN {METER}"));
    assert_eq!(dongle.command().await, "SKINFO");
    assert_eq!(dongle.next_line().await, None);

    let note = notes.recv().await.unwrap();
    assert_eq!(note.status.state, SessionState::Failed);
    assert!(matches!(note.error, Some(SmartMeterError::JoinFailed { attempts: 2 })));
    assert!(joined.elapsed() >= Duration::from_secs(10));

    assert_eq!(meter.state().await.unwrap(), SessionState::Failed);
    meter.release().await.unwrap();
}

/// Tests that observation polls a dynamic property every interval.
#[tokio::test(start_paused = true)]
async fn test_observation_polls_at_base_interval() {
    let mut config = config();
    config.observation_epcs = vec![EPC_INSTANTANEOUS_POWER];
    let (meter, _notes, mut dongle) = available(config).await;

    assert!(meter.start_observation(Duration::from_secs(1)).await.unwrap());
    assert!(!meter.start_observation(Duration::from_secs(1)).await.unwrap());

    let started = Instant::now();
    let line = dongle.next_line().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert!(line.ends_with(&decode_hex("6201E700").unwrap()));

    dongle.reply(&erxudp("1081000102880105FF017201E704000001F4")).await;
    let line = dongle.next_line().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert!(line.ends_with(&decode_hex("6201E700").unwrap()));

    meter.stop_observation().await.unwrap();
    assert!(tokio::time::timeout(Duration::from_secs(5), dongle.next_line()).await.is_err());
}

/// Tests that a known static property is not polled again until the registry is reset.
#[tokio::test(start_paused = true)]
async fn test_observation_skips_known_static_property() {
    let mut config = config();
    config.observation_epcs = vec![EPC_MANUFACTURER_CODE];
    let (meter, mut notes, mut dongle) = available(config).await;

    meter.start_observation(Duration::from_secs(1)).await.unwrap();
    let line = dongle.next_line().await.unwrap();
    assert!(line.ends_with(&decode_hex("62018A00").unwrap()));

    dongle.reply(&erxudp("1081000102880105FF0172018A03000016")).await;
    notes.recv().await.unwrap();
    assert!(tokio::time::timeout(Duration::from_secs(5), dongle.next_line()).await.is_err());

    meter.reset_registry().await.unwrap();
    let line = tokio::time::timeout(Duration::from_secs(2), dongle.next_line())
        .await
        .unwrap()
        .unwrap();
    assert!(line.ends_with(&decode_hex("62018A00").unwrap()));
}

/// Tests that registry watchers hear about changes only.
#[tokio::test(start_paused = true)]
async fn test_facilities_watch_reports_changes() {
    let (meter, mut notes, mut dongle) = available(config()).await;
    let mut changes = meter.observe_facilities(Duration::from_millis(500)).await.unwrap();

    dongle.reply(&erxudp("1081000102880105FF017201E704000001F4")).await;
    notes.recv().await.unwrap();
    let snapshot = changes.recv().await.unwrap();
    assert!(snapshot.contains(METER));

    dongle.reply(&erxudp("1081000102880105FF017201E704000001F4")).await;
    notes.recv().await.unwrap();
    assert!(tokio::time::timeout(Duration::from_secs(3), changes.recv()).await.is_err());
}

/// Tests that release answers once, closes the port and ends the driver mid-bootstrap.
#[tokio::test(start_paused = true)]
async fn test_release_during_bootstrap() {
    let (port, remote) = tokio::io::duplex(4096);
    let (meter, mut notes) = SmartMeter::spawn(port, config());
    let mut dongle = Dongle::new(remote);
    assert_eq!(dongle.command().await, "SKSREG SFE 0");

    meter.release().await.unwrap();
    assert_eq!(dongle.next_line().await, None);
    assert!(matches!(meter.state().await, Err(SmartMeterError::Closed)));
    assert!(matches!(meter.release().await, Err(SmartMeterError::Closed)));
    assert!(notes.recv().await.is_none());
}

/// Tests that a closed port is reported and that release stops the driver.
#[tokio::test(start_paused = true)]
async fn test_port_closed_then_release() {
    let (meter, mut notes, dongle) = available(config()).await;
    drop(dongle);

    let note = notes.recv().await.unwrap();
    assert!(matches!(note.error, Some(SmartMeterError::Io(_))));
    assert_eq!(note.status.state, SessionState::Available);

    meter.release().await.unwrap();
    assert!(matches!(meter.state().await, Err(SmartMeterError::Closed)));
    assert!(notes.recv().await.is_none());
}
