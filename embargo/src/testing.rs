use std::{
    io::{Read, Write},
    sync::Arc,
};

use blob_store::{BlobStorageConfig, BlobStore, ObjectStoreBlobStore};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry_sdk::metrics::{
    data::{AggregatedMetrics, MetricData},
    InMemoryMetricExporter,
    PeriodicReader,
    SdkMeterProvider,
};
use tar::{Builder, EntryType, Header};

pub const MEMBER_MTIME: u64 = 1_488_063_600;

pub struct Member {
    pub name: String,
    pub content: Vec<u8>,
    pub entry_type: EntryType,
    pub mode: u32,
    pub mtime: u64,
}

impl Member {
    pub fn file(name: &str, content: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_vec(),
            entry_type: EntryType::Regular,
            mode: 0o644,
            mtime: MEMBER_MTIME,
        }
    }

    pub fn dir(name: &str) -> Self {
        Self {
            name: name.to_string(),
            content: Vec::new(),
            entry_type: EntryType::Directory,
            mode: 0o755,
            mtime: MEMBER_MTIME,
        }
    }
}

pub fn build_archive(members: &[Member]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for member in members {
        let mut header = Header::new_gnu();
        header.set_entry_type(member.entry_type);
        header.set_size(member.content.len() as u64);
        header.set_mode(member.mode);
        header.set_mtime(member.mtime);
        if member.name.len() <= header.as_old().name.len() {
            // Stored verbatim so `./` and absolute names survive.
            header.as_old_mut().name[..member.name.len()].copy_from_slice(member.name.as_bytes());
            header.set_cksum();
            builder.append(&header, member.content.as_slice()).unwrap();
        } else {
            builder
                .append_data(&mut header, &member.name, member.content.as_slice())
                .unwrap();
        }
    }
    let tar_bytes = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// Members of a tar+gzip archive, in order.
pub fn archive_members(archive: &[u8]) -> Vec<Member> {
    let mut tar_bytes = Vec::new();
    GzDecoder::new(archive).read_to_end(&mut tar_bytes).unwrap();
    let mut reader = tar::Archive::new(tar_bytes.as_slice());
    reader
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            Member {
                name: entry.path().unwrap().to_string_lossy().into_owned(),
                content,
                entry_type: entry.header().entry_type(),
                mode: entry.header().mode().unwrap(),
                mtime: entry.header().mtime().unwrap(),
            }
        })
        .collect()
}

pub fn memory_store() -> Arc<dyn BlobStore> {
    Arc::new(ObjectStoreBlobStore::new(&BlobStorageConfig::new("memory://")).unwrap())
}

/// Meter provider backed by an in-memory exporter, for asserting on counters.
pub struct MetricsCapture {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl MetricsCapture {
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        Self { exporter, provider }
    }

    pub fn meter(&self) -> Meter {
        self.provider.meter("embargo-test")
    }

    /// Current value of the u64 counter `name`, summed over the data points
    /// carrying every label in `labels`.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.provider.force_flush().unwrap();
        let exported = self.exporter.get_finished_metrics().unwrap();
        let Some(latest) = exported.last() else {
            return 0;
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == name)
            .map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => sum
                    .data_points()
                    .filter(|point| {
                        labels.iter().all(|(key, value)| {
                            point
                                .attributes()
                                .any(|kv| kv.key.as_str() == *key && kv.value.as_str() == *value)
                        })
                    })
                    .map(|point| point.value())
                    .sum::<u64>(),
                _ => 0,
            })
            .sum()
    }
}
