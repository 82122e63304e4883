use std::time::Duration;

use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

/// Install the global OTLP meter provider.
///
/// Meters created before this call, or when metrics are disabled, are no-ops.
pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
    instance_id: &str,
    service_version: &str,
) -> Result<Option<SdkMeterProvider>> {
    if !enable_metrics {
        return Ok(None);
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "etl-embargo"))
        .with_attribute(KeyValue::new("service.name", "embargo-server"))
        .with_attribute(KeyValue::new("embargo.instance.id", instance_id.to_string()))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ))
        .build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}

pub mod embargo_stats {
    use data_model::{Classification, DecisionReason};
    use opentelemetry::{
        metrics::{Counter, Meter},
        KeyValue,
    };

    /// Counters for the split side of the pipeline.
    ///
    /// Every counter carries the record type as `experiment`.
    #[derive(Debug, Clone)]
    pub struct Metrics {
        experiment: String,
        pub archives_succeeded: Counter<u64>,
        pub archives_failed: Counter<u64>,
        pub members: Counter<u64>,
        pub decisions: Counter<u64>,
        pub ip_errors: Counter<u64>,
    }

    impl Metrics {
        pub fn new(experiment: &str) -> Metrics {
            Self::with_meter(experiment, &opentelemetry::global::meter("embargo"))
        }

        pub fn with_meter(experiment: &str, meter: &Meter) -> Metrics {
            let archives_succeeded = meter
                .u64_counter("embargo_success_total")
                .with_description("Number of archives split and uploaded successfully")
                .build();
            let archives_failed = meter
                .u64_counter("embargo_error_total")
                .with_description("Number of archives that could not be split or uploaded")
                .build();
            let members = meter
                .u64_counter("embargo_members_total")
                .with_description("Number of archive members by classification")
                .build();
            let decisions = meter
                .u64_counter("embargo_decisions_total")
                .with_description("Number of policy decisions by reason")
                .build();
            let ip_errors = meter
                .u64_counter("ipv6_normalization_errors_total")
                .with_description("Number of record names whose address segment did not parse")
                .build();
            Metrics {
                experiment: experiment.to_string(),
                archives_succeeded,
                archives_failed,
                members,
                decisions,
                ip_errors,
            }
        }

        pub fn archive_succeeded(&self, day_of_week: &str) {
            self.archives_succeeded.add(1, &self.day_labels(day_of_week));
        }

        pub fn archive_failed(&self, day_of_week: &str) {
            self.archives_failed.add(1, &self.day_labels(day_of_week));
        }

        pub fn members_classified(&self, classification: Classification, count: u64) {
            if count == 0 {
                return;
            }
            self.members.add(
                count,
                &[
                    KeyValue::new("experiment", self.experiment.clone()),
                    KeyValue::new("classification", classification.as_ref().to_string()),
                ],
            );
        }

        pub fn decisions_made(&self, reason: DecisionReason, count: u64) {
            if count == 0 {
                return;
            }
            self.decisions
                .add(count, &[KeyValue::new("reason", reason.as_ref().to_string())]);
        }

        pub fn ip_error(&self, kind: &'static str, count: u64) {
            if count == 0 {
                return;
            }
            self.ip_errors.add(count, &[KeyValue::new("error", kind)]);
        }

        fn day_labels(&self, day_of_week: &str) -> [KeyValue; 2] {
            [
                KeyValue::new("experiment", self.experiment.clone()),
                KeyValue::new("day_of_week", day_of_week.to_string()),
            ]
        }
    }
}

pub mod unembargo_stats {
    use opentelemetry::{metrics::Counter, KeyValue};

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub objects: Counter<u64>,
        pub runs_failed: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("embargo");
            let objects = meter
                .u64_counter("unembargo_objects_total")
                .with_description("Objects touched by unembargo migration, by operation")
                .build();
            let runs_failed = meter
                .u64_counter("unembargo_error_total")
                .with_description("Unembargo migrations that stopped on an error")
                .build();
            Metrics {
                objects,
                runs_failed,
            }
        }

        pub fn object(&self, op: &'static str) {
            self.objects.add(1, &[KeyValue::new("op", op)]);
        }
    }
}
