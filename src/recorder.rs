// ===============================
// src/recorder.rs
// ===============================
//
// JSONL journal of terminal events:
// - one serde_json line per Event, appended;
// - BufWriter, flushed every second and every FLUSH_EVERY events;
// - parent directory created on open; one reopen attempt on write failure.
//
// Enabled with RECORD_FILE=/path/to/events.jsonl.
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY: u32 = 256;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, %path, "recorder: open failed, journal disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut flush_tick = interval(Duration::from_secs(1));
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut unflushed: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_vec(&ev) {
                    Ok(l) => l,
                    Err(e) => {
                        error!(error = %e, "recorder: serialize failed, event dropped");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(error = %e, "recorder: write failed, reopening");
                    match open_writer(&path).await {
                        Ok(w) => {
                            writer = w;
                            if let Err(e) = write_line(&mut writer, &line).await {
                                error!(error = %e, "recorder: write failed after reopen, event dropped");
                                continue;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "recorder: reopen failed, stopped");
                            break;
                        }
                    }
                }
                unflushed += 1;
                if unflushed >= FLUSH_EVERY {
                    let _ = writer.flush().await;
                    unflushed = 0;
                }
            }
            _ = flush_tick.tick() => {
                if unflushed > 0 {
                    let _ = writer.flush().await;
                    unflushed = 0;
                }
            }
        }
    }
}
