//! Periodic sampling of the metering device.
//!
//! Each tick fetches the device status, upserts one reading into the store,
//! then appends the same reading to the export mirror. The two writes are not
//! transactional: if the process dies between them, or the append fails, the
//! store holds a row the mirror does not. That gap is logged and left alone.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use energy_client::{Reading, ReadingStore};
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

use crate::{device::DeviceClient, error::AppError, export::ExportMirror};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectorState {
    Idle = 0,
    Fetching = 1,
    Persisting = 2,
}

impl CollectorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Fetching,
            2 => Self::Persisting,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Reading stored; `mirrored` is false if the export append failed.
    Persisted { reading: Reading, mirrored: bool },
    /// Nothing was stored.
    Abandoned(AppError),
    /// A previous tick was still running.
    Skipped,
}

/// Returns the collector to `Idle` when a tick ends, however it ends.
struct IdleOnDrop<'a>(&'a AtomicU8);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(CollectorState::Idle as u8, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct Collector {
    device: Arc<dyn DeviceClient>,
    store: ReadingStore,
    mirror: ExportMirror,
    state: Arc<AtomicU8>,
}

impl Collector {
    pub fn new(device: Arc<dyn DeviceClient>, store: ReadingStore, mirror: ExportMirror) -> Self {
        Self {
            device,
            store,
            mirror,
            state: Arc::new(AtomicU8::new(CollectorState::Idle as u8)),
        }
    }

    pub fn state(&self) -> CollectorState {
        CollectorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CollectorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Tick forever. The first tick fires immediately.
    pub async fn run(self, interval: Duration) {
        tracing::info!(interval_secs = interval.as_secs(), "collector started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(OffsetDateTime::now_utc).await
    }

    /// One collection pass. `now` is read after the device answers.
    pub async fn tick_at<F>(&self, now: F) -> TickOutcome
    where
        F: FnOnce() -> OffsetDateTime + Send,
    {
        metrics::counter!("collector_ticks_total").increment(1);

        if self
            .state
            .compare_exchange(
                CollectorState::Idle as u8,
                CollectorState::Fetching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::warn!(state = ?self.state(), "previous tick still running, skipping");
            metrics::counter!("collector_ticks_skipped_total").increment(1);
            return TickOutcome::Skipped;
        }
        let _idle = IdleOnDrop(&self.state);

        let status = match self.device.get_status().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "device status failed, tick abandoned");
                metrics::counter!("device_errors_total").increment(1);
                metrics::counter!("collector_ticks_abandoned_total").increment(1);
                return TickOutcome::Abandoned(e.into());
            }
        };

        metrics::gauge!("device_power_watts").set(status.power);
        metrics::gauge!("device_current_amps").set(status.current);
        metrics::gauge!("device_voltage_volts").set(status.voltage);

        self.set_state(CollectorState::Persisting);
        let reading = Reading::sample(now(), status.power, status.current, status.voltage);

        if let Err(e) = self.store.upsert(&reading).await {
            tracing::error!(error = %e, ts = %reading.ts_key(), "store write failed, tick abandoned");
            metrics::counter!("collector_ticks_abandoned_total").increment(1);
            return TickOutcome::Abandoned(e.into());
        }
        metrics::counter!("readings_upserted_total").increment(1);

        let mirrored = match self.mirror.append(&reading).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    ts = %reading.ts_key(),
                    "export mirror append failed; store is ahead of mirror"
                );
                metrics::counter!("export_mirror_append_errors_total").increment(1);
                false
            }
        };

        tracing::info!(
            ts = %reading.ts_key(),
            power = reading.power,
            current = reading.current,
            voltage = reading.voltage,
            kwh = reading.kwh,
            "reading recorded"
        );

        TickOutcome::Persisted { reading, mirrored }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, DeviceStatus};
    use energy_client::TimeRange;
    use std::{collections::VecDeque, sync::Mutex};
    use time::macros::{date, datetime};
    use tokio::sync::Notify;

    /// Replays scripted status results; optionally blocks until released.
    #[derive(Default)]
    struct ScriptedDevice {
        script: Mutex<VecDeque<Result<DeviceStatus, DeviceError>>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedDevice {
        fn new(script: Vec<Result<DeviceStatus, DeviceError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                gate: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl DeviceClient for ScriptedDevice {
        async fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(DeviceError::Timeout))
        }

        async fn turn_on(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn turn_off(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn status(power: f64) -> DeviceStatus {
        DeviceStatus {
            switch: true,
            power,
            current: power / 230.0,
            voltage: 230.0,
        }
    }

    async fn fixture(
        device: ScriptedDevice,
        mirror_path: Option<std::path::PathBuf>,
    ) -> (tempfile::TempDir, Collector, ReadingStore, ExportMirror) {
        let dir = tempfile::tempdir().unwrap();
        let store = ReadingStore::open(dir.path().join("energy.db"), 2).await.unwrap();
        let mirror = ExportMirror::new(mirror_path.unwrap_or_else(|| dir.path().join("energy.csv")));
        let collector = Collector::new(Arc::new(device), store.clone(), mirror.clone());
        (dir, collector, store, mirror)
    }

    fn mirror_rows(mirror: &ExportMirror) -> Vec<csv::StringRecord> {
        csv::Reader::from_path(mirror.path())
            .map(|mut r| r.records().map(Result::unwrap).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn tick_persists_reading_to_store_and_mirror() {
        let (_dir, collector, store, mirror) = fixture(ScriptedDevice::new(vec![Ok(status(600.0))]), None).await;

        let outcome = collector.tick_at(|| datetime!(2024-01-01 00:05:00.400 UTC)).await;

        let reading = match outcome {
            TickOutcome::Persisted { reading, mirrored } => {
                assert!(mirrored);
                reading
            }
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(reading.ts, datetime!(2024-01-01 00:05:00 UTC));
        assert!((reading.kwh - 0.01).abs() < 1e-12);

        let stored = store.query(TimeRange::day(date!(2024-01-01))).await.unwrap();
        assert_eq!(stored, vec![reading]);

        let rows = mirror_rows(&mirror);
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "2024-01-01T00:05:00Z");
        assert_eq!(collector.state(), CollectorState::Idle);
    }

    #[tokio::test]
    async fn device_failure_abandons_tick_without_writes() {
        let device = ScriptedDevice::new(vec![
            Err(DeviceError::Api {
                code: 1106,
                msg: "permission deny".to_string(),
            }),
            Ok(status(120.0)),
        ]);
        let (_dir, collector, store, mirror) = fixture(device, None).await;

        let first = collector.tick_at(|| datetime!(2024-01-01 01:09:00 UTC)).await;
        assert!(matches!(first, TickOutcome::Abandoned(AppError::Device(_))));
        assert_eq!(store.count_and_sum(TimeRange::day(date!(2024-01-01))).await.unwrap().0, 0);
        assert!(mirror_rows(&mirror).is_empty());

        // The failure does not poison later ticks.
        let second = collector.tick_at(|| datetime!(2024-01-01 01:10:00 UTC)).await;
        assert!(matches!(second, TickOutcome::Persisted { mirrored: true, .. }));
        assert_eq!(collector.state(), CollectorState::Idle);
    }

    #[tokio::test]
    async fn mirror_failure_keeps_store_write() {
        let dir = tempfile::tempdir().unwrap();
        // Mirror path is a directory, so appends fail.
        let (_db_dir, collector, store, _mirror) = fixture(
            ScriptedDevice::new(vec![Ok(status(600.0))]),
            Some(dir.path().to_path_buf()),
        )
        .await;

        let outcome = collector.tick_at(|| datetime!(2024-01-01 00:05:00 UTC)).await;

        assert!(matches!(outcome, TickOutcome::Persisted { mirrored: false, .. }));
        assert_eq!(store.count_and_sum(TimeRange::day(date!(2024-01-01))).await.unwrap().0, 1);
    }

    #[tokio::test]
    async fn repeated_timestamp_upserts_store_but_duplicates_mirror() {
        let device = ScriptedDevice::new(vec![Ok(status(600.0)), Ok(status(300.0))]);
        let (_dir, collector, store, mirror) = fixture(device, None).await;
        let ts = datetime!(2024-01-01 00:05:00 UTC);

        collector.tick_at(|| ts).await;
        collector.tick_at(|| ts).await;

        let stored = store.query(TimeRange::day(date!(2024-01-01))).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].power, 300.0);
        assert_eq!(mirror_rows(&mirror).len(), 2);
    }

    #[tokio::test]
    async fn run_ticks_immediately_on_start() {
        let (_dir, collector, store, _mirror) = fixture(ScriptedDevice::new(vec![Ok(status(600.0))]), None).await;
        let now = OffsetDateTime::now_utc();
        let around_now = TimeRange::new(now - time::Duration::DAY, now + time::Duration::DAY);

        // An hour-long interval: only the startup tick can land within the timeout.
        let running = tokio::spawn(collector.clone().run(Duration::from_secs(3600)));

        let count = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let (count, _) = store.count_and_sum(around_now).await.unwrap();
                if count > 0 {
                    return count;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no reading before the first interval elapsed");

        running.abort();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let device = ScriptedDevice {
            script: Mutex::new(vec![Ok(status(600.0))].into()),
            gate: Some(gate.clone()),
        };
        let (_dir, collector, _store, _mirror) = fixture(device, None).await;

        let running = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.tick_at(|| datetime!(2024-01-01 00:05:00 UTC)).await })
        };

        while collector.state() == CollectorState::Idle {
            tokio::task::yield_now().await;
        }
        assert!(matches!(collector.tick().await, TickOutcome::Skipped));

        gate.notify_one();
        assert!(matches!(running.await.unwrap(), TickOutcome::Persisted { .. }));
        assert_eq!(collector.state(), CollectorState::Idle);
    }
}
