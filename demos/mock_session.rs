//! Mock session example.
//!
//! Feeds a synthetic camera session through a `Station`: records to sample
//! log files in a temp directory, rotates once, and relays to a mock push
//! endpoint.
//!
//! Run with: RUST_LOG=media_fanout=debug cargo run --example mock_session

use std::sync::Arc;
use std::time::Duration;

use media_fanout::container::{SampleLog, SampleLogFactory};
use media_fanout::push::MockPushConnector;
use media_fanout::source::MockConnector;
use media_fanout::{CodecParameters, MediaFanout, RecordingSink, RelaySink, Station};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_micros(33_333);
const AAC_FRAME: Duration = Duration::from_micros(21_333);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let connector = Arc::new(MockConnector::new());
    let feed = connector.push_feed();
    let push = MockPushConnector::new();

    let distributor = MediaFanout::builder()
        .connector(Arc::clone(&connector))
        .on_event(|e| println!("[session] {e:?}"))
        .build()?;

    let recording = RecordingSink::new(SampleLogFactory::new())
        .on_event(|e| println!("[recording] {e:?}"));
    let relay = RelaySink::new(push.clone()).on_health(|e| println!("[relay] {e:?}"));
    let station = Station::new(distributor, Arc::new(recording), Arc::new(relay));

    let dir = std::env::temp_dir().join("media-fanout-demo");
    let session = station.connect("rtsp://192.168.1.20:554/stream1")?;
    station.start_recording(&dir, "video/avc", 1280, 720);
    station.start_streaming("rtmp://live.example.com/app/key", false);

    feed.connected(CodecParameters::new(
        vec![0x67, 0x42, 0x00, 0x1f],
        vec![0x68, 0xce, 0x3c, 0x80],
        1280,
        720,
        48000,
        2,
    ));

    // Two seconds of 30 fps video with a keyframe every second, plus audio
    let mut audio_ts = Duration::ZERO;
    for frame in 0..60u32 {
        let ts = FRAME * frame;
        let nal = if frame % 30 == 0 { 0x65 } else { 0x41 };
        feed.video(vec![0, 0, 0, 1, nal, 0x88, 0x84], ts);
        while audio_ts <= ts {
            feed.audio(vec![0x21, 0x10, 0x04], audio_ts);
            audio_ts += AAC_FRAME;
        }
        if frame == 10 {
            feed.flush();
            println!("requesting a new file at the next keyframe");
            station.request_new_file();
        }
    }
    feed.flush();

    println!("recording to {:?}", station.recording_path());
    station.shutdown()?;

    let stats = session.stats();
    println!(
        "session {}: {} video ({} key), {} audio, ended: {:?}",
        session.id(),
        stats.video_units,
        stats.key_frames,
        stats.audio_units,
        session.end_reason()
    );

    if let Some(client) = push.latest() {
        println!("relay sent {} stream calls", client.stream_calls().len());
    }

    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        match SampleLog::read(&path) {
            Ok(log) => println!("{}: {} samples", path.display(), log.samples.len()),
            Err(e) => println!("{}: unreadable ({e})", path.display()),
        }
    }

    Ok(())
}
