use std::sync::Arc;

use parking_lot::RwLock;
use skylink_proto::stamp;
use skylink_proto::telemetry::{TelemetryFields, TelemetrySnapshot, TelemetryUpdate};
use time::OffsetDateTime;

/// Latest-known value per telemetry field.
#[derive(Clone, Default)]
pub struct TelemetryAggregator {
    fields: Arc<RwLock<TelemetryFields>>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, u: TelemetryUpdate) {
        u.apply(&mut self.fields.write());
    }

    /// Point-in-time copy of every field, stamped now.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let fields = self.fields.read().clone();
        TelemetrySnapshot { timestamp: stamp::clock(OffsetDateTime::now_utc()), fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_latest_values() {
        let agg = TelemetryAggregator::new();
        assert!(agg.snapshot().fields.is_empty());

        agg.update(TelemetryUpdate::BatteryPercent(90));
        agg.update(TelemetryUpdate::SatelliteCount(7));
        agg.update(TelemetryUpdate::BatteryPercent(89));

        let s = agg.snapshot();
        assert_eq!(s.fields.battery_percent, Some(89));
        assert_eq!(s.fields.satellite_count, Some(7));
        assert_eq!(s.fields.heading_deg, None);
        assert_eq!(s.timestamp.len(), "00:00:00.000".len());
    }

    #[test]
    fn concurrent_writers() {
        let agg = TelemetryAggregator::new();
        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let a = agg.clone();
                std::thread::spawn(move || {
                    for n in 0..500 {
                        a.update(TelemetryUpdate::SatelliteCount(i * 1000 + n));
                        a.update(TelemetryUpdate::Heading(f64::from(n)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = agg.snapshot();
        assert_eq!(s.fields.heading_deg, Some(499.0));
        assert!(s.fields.satellite_count.unwrap() % 1000 == 499);
    }
}
