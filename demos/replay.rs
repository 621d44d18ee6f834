//! Replaying a captured event stream into a durable mirror.
//!
//! Usage: `cargo run --example replay [capture.jsonl]`
//!
//! Without an argument a small built-in capture is used. Every line is a
//! `RemoteEvent` in JSON. The mirror lives in a temporary directory and is
//! reopened at the end to show that deleted messages survive a restart.

use mirrorfold::{
    JournalStore, JsonLinesSource, MessageKey, MirrorConfig, QueryService, Reconciler, Shutdown,
};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::sync::Arc;

const CHANNEL: i64 = -1001;

const SAMPLE: &str = r#"{"type":"new_message","channel_id":-1001,"message_id":1,"sender_id":42,"text":"meet at 6","timestamp":1700000000}
{"type":"new_message","channel_id":-1001,"message_id":2,"sender_id":43,"text":"ok","timestamp":1700000005}
{"type":"message_edited","channel_id":-1001,"message_id":1,"text":"meet at 7","timestamp":1700000030}
{"type":"message_edited","channel_id":-1001,"message_id":1,"text":"meet at 8, sorry","timestamp":1700000060}
{"type":"messages_deleted","channel_id":-1001,"message_ids":[1,3],"timestamp":1700000090}
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = MirrorConfig {
        data_dir: dir.path().join("mirror"),
        ..MirrorConfig::default()
    };

    let reader: Box<dyn BufRead> = match std::env::args().nth(1) {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(Cursor::new(SAMPLE)),
    };

    // Phase 1: consume the capture
    {
        let store = Arc::new(config.store_builder().open()?);
        let reconciler = Reconciler::with_options(Arc::clone(&store), config.reconciler_options());
        let mut source = JsonLinesSource::new(reader);
        let report = reconciler.run(&mut source, &Shutdown::new())?;
        println!(
            "Applied {} events: {} created, {} updated, {} tombstoned, {} duplicates",
            report.delivered, report.created, report.updated, report.tombstoned, report.duplicates
        );
    }

    // Phase 2: reopen and look at what the remote side no longer shows
    let store = Arc::new(JournalStore::open(&config.data_dir)?);
    let query = QueryService::new(store);

    println!("\nDeleted in {CHANNEL}:");
    for record in query.list_deleted(CHANNEL, 20, 0) {
        if record.is_tombstone() {
            println!("  #{} (never seen)", record.message_id);
        } else {
            println!("  #{} from {}: {:?}", record.message_id, record.sender_id, record.current_text);
        }
    }

    println!("\nHistory of message 1:");
    for entry in query.get_history(&MessageKey::new(CHANNEL, 1)) {
        println!("  [{}] {} {:?}", entry.sequence, entry.observed_at, entry.text);
    }

    Ok(())
}
