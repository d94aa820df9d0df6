use anyhow::Result;
use prometheus::{
    opts, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};

/// Prometheus metrics collector for the assessment pipeline
pub struct MetricsCollector {
    registry: Registry,

    // Assessment pipeline
    pub assessments_total: IntCounter,
    pub assessments_fallback_total: IntCounter,
    pub predictor_latency_ms: Histogram,

    // Notifications
    pub notifications_created_total: IntCounter,
    pub notification_failures_total: IntCounter,

    // Attendance batches
    pub attendance_items_total: IntCounter,
    pub attendance_item_failures_total: IntCounter,

    // Realtime fan-out
    pub realtime_events_total: IntCounter,
    pub realtime_subscribers: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let assessments_total = IntCounter::with_opts(opts!(
            "edurisk_assessments_total",
            "Total number of completed risk assessments"
        ))?;

        let assessments_fallback_total = IntCounter::with_opts(opts!(
            "edurisk_assessments_fallback_total",
            "Assessments finalized by the rule-based fallback"
        ))?;

        let predictor_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "edurisk_predictor_latency_ms",
                "External predictor call latency in milliseconds",
            )
            .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
        )?;

        let notifications_created_total = IntCounter::with_opts(opts!(
            "edurisk_notifications_created_total",
            "Total number of notifications persisted"
        ))?;

        let notification_failures_total = IntCounter::with_opts(opts!(
            "edurisk_notification_failures_total",
            "Notifications that could not be persisted"
        ))?;

        let attendance_items_total = IntCounter::with_opts(opts!(
            "edurisk_attendance_items_total",
            "Attendance batch items processed"
        ))?;

        let attendance_item_failures_total = IntCounter::with_opts(opts!(
            "edurisk_attendance_item_failures_total",
            "Attendance batch items that failed"
        ))?;

        let realtime_events_total = IntCounter::with_opts(opts!(
            "edurisk_realtime_events_total",
            "Realtime events published"
        ))?;

        let realtime_subscribers = IntGauge::with_opts(opts!(
            "edurisk_realtime_subscribers",
            "Currently connected realtime subscribers"
        ))?;

        registry.register(Box::new(assessments_total.clone()))?;
        registry.register(Box::new(assessments_fallback_total.clone()))?;
        registry.register(Box::new(predictor_latency_ms.clone()))?;
        registry.register(Box::new(notifications_created_total.clone()))?;
        registry.register(Box::new(notification_failures_total.clone()))?;
        registry.register(Box::new(attendance_items_total.clone()))?;
        registry.register(Box::new(attendance_item_failures_total.clone()))?;
        registry.register(Box::new(realtime_events_total.clone()))?;
        registry.register(Box::new(realtime_subscribers.clone()))?;

        Ok(Self {
            registry,
            assessments_total,
            assessments_fallback_total,
            predictor_latency_ms,
            notifications_created_total,
            notification_failures_total,
            attendance_items_total,
            attendance_item_failures_total,
            realtime_events_total,
            realtime_subscribers,
        })
    }

    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_assessment(&self, fallback_used: bool) {
        self.assessments_total.inc();
        if fallback_used {
            self.assessments_fallback_total.inc();
        }
    }

    pub fn record_notification(&self, persisted: bool) {
        if persisted {
            self.notifications_created_total.inc();
        } else {
            self.notification_failures_total.inc();
        }
    }

    pub fn record_attendance_item(&self, succeeded: bool) {
        self.attendance_items_total.inc();
        if !succeeded {
            self.attendance_item_failures_total.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_registered_metrics() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_assessment(true);
        metrics.record_attendance_item(false);

        let output = metrics.gather().unwrap();
        assert!(output.contains("edurisk_assessments_total 1"));
        assert!(output.contains("edurisk_assessments_fallback_total 1"));
        assert!(output.contains("edurisk_attendance_item_failures_total 1"));
    }
}
