use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use whipctl_lib::error::{Error, Result};
use whipctl_lib::peer::types::MediaKind;
use whipctl_lib::stats::{RawStats, RawTrackStats, StatsSampler, StatsSnapshot, StatsSource};

/// Reports 25 kB more video on every sample.
struct CountingSource {
    samples: AtomicU64,
}

#[async_trait]
impl StatsSource for CountingSource {
    async fn sample(&self) -> Result<RawStats> {
        let n = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
        let mut video = RawTrackStats::new(MediaKind::Video, n * 25_000);
        video.codec_id = Some("v".into());
        Ok(RawStats {
            tracks: vec![video],
            codecs: HashMap::from([("v".to_owned(), "video/h264".to_owned())]),
            ice_state: Some("connected".into()),
            dtls_state: Some("connected".into()),
        })
    }
}

struct BrokenSource;

#[async_trait]
impl StatsSource for BrokenSource {
    async fn sample(&self) -> Result<RawStats> {
        Err(Error::Transport("stats unavailable".into()))
    }
}

fn spawn(
    source: Arc<dyn StatsSource>,
) -> (whipctl_lib::stats::SamplerHandle, mpsc::UnboundedReceiver<StatsSnapshot>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = StatsSampler::new(source, Duration::from_secs(1)).spawn(move |snapshot| {
        let _ = tx.send(snapshot);
    });
    (handle, rx)
}

#[tokio::test(start_paused = true)]
async fn samples_every_second_with_bitrate_from_deltas() {
    let (handle, mut rx) = spawn(Arc::new(CountingSource {
        samples: AtomicU64::new(0),
    }));

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let mut snapshots = Vec::new();
    while let Ok(s) = rx.try_recv() {
        snapshots.push(s);
    }
    assert_eq!(snapshots.len(), 4);

    let first = snapshots[0].get(MediaKind::Video).unwrap();
    assert_eq!(first.bitrate_bps, 0);
    assert_eq!(first.codec.as_deref(), Some("H264"));
    for later in &snapshots[1..] {
        assert_eq!(later.video.as_ref().unwrap().bitrate_bps, 200_000);
    }
    assert_eq!(snapshots[0].ice_state.as_deref(), Some("connected"));
    assert!(snapshots[0].audio.is_none());

    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancelled_sampler_never_fires_again() {
    let (handle, mut rx) = spawn(Arc::new(CountingSource {
        samples: AtomicU64::new(0),
    }));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    handle.cancel();
    while rx.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());
    assert!(handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_sampling() {
    let (handle, mut rx) = spawn(Arc::new(CountingSource {
        samples: AtomicU64::new(0),
    }));
    tokio::time::sleep(Duration::from_millis(500)).await;
    drop(handle);
    while rx.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_samples_are_skipped() {
    let (handle, mut rx) = spawn(Arc::new(BrokenSource));
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(rx.try_recv().is_err());
    assert!(!handle.is_finished());
    handle.cancel();
}
