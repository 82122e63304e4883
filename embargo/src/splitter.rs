//! Split one tar+gzip archive into a public and a private archive.
//!
//! The whole archive is decompressed into memory before any member is looked
//! at, bounded by `max_bytes` on both the compressed and the decompressed
//! side. Outputs are built in memory and only returned when the whole input
//! was read without error.

use std::{
    collections::HashMap,
    io::{self, Read, Write},
};

use bytes::Bytes;
use data_model::{Classification, DecisionReason};
use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::{error::SplitError, policy::EmbargoPolicy};

const LONG_LINK: &[u8] = b"././@LongLink";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitStats {
    pub public: u64,
    pub private: u64,
    pub reasons: HashMap<DecisionReason, u64>,
}

impl SplitStats {
    fn record(&mut self, classification: Classification, reason: DecisionReason) {
        match classification {
            Classification::Public => self.public += 1,
            Classification::Embargoed => self.private += 1,
        }
        *self.reasons.entry(reason).or_default() += 1;
    }

    pub fn reason_count(&self, reason: DecisionReason) -> u64 {
        self.reasons.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.public + self.private
    }

    pub fn merge(&mut self, other: &SplitStats) {
        self.public += other.public;
        self.private += other.private;
        for (reason, count) in &other.reasons {
            *self.reasons.entry(*reason).or_default() += count;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitOutput {
    /// tar+gzip of the members that may be released.
    pub public: Vec<u8>,
    /// tar+gzip of the embargoed members.
    pub private: Vec<u8>,
    pub stats: SplitStats,
}

pub fn split(
    archive: &[u8],
    policy: &EmbargoPolicy,
    max_bytes: u64,
) -> Result<SplitOutput, SplitError> {
    if archive.len() as u64 > max_bytes {
        return Err(SplitError::TooLarge { limit: max_bytes });
    }
    let tar_bytes = gunzip(archive, max_bytes)?;

    let mut public = Builder::new(Vec::new());
    let mut private = Builder::new(Vec::new());
    let mut stats = SplitStats::default();

    let tar_len = tar_bytes.len() as u64;
    let mut input = tar::Archive::new(tar_bytes.as_slice());
    for entry in input.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path_bytes().into_owned();
        let basename = basename(&name);

        // The size field is untrusted: it must fit in what is left of the tar.
        let size = entry.size();
        let remaining = tar_len.saturating_sub(entry.raw_file_position());
        if size > remaining {
            return Err(SplitError::Archive(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("member {basename} claims {size} bytes, only {remaining} left"),
            )));
        }
        let mode = entry.header().mode()?;
        let mtime = entry.header().mtime()?;
        let mut content = Vec::with_capacity(size as usize);
        entry.read_to_end(&mut content)?;
        if content.len() as u64 != size {
            return Err(SplitError::Archive(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("member {basename} is truncated"),
            )));
        }

        let decision = policy.classify(&basename);
        stats.record(decision.classification(), decision.reason);
        debug!(
            member = %basename,
            reason = %decision.reason,
            embargoed = decision.embargoed,
            "classified member"
        );

        let builder = if decision.embargoed {
            &mut private
        } else {
            &mut public
        };
        append_member(builder, &name, mode, mtime, &content)?;
    }

    Ok(SplitOutput {
        public: gzip(public.into_inner()?)?,
        private: gzip(private.into_inner()?)?,
        stats,
    })
}

/// [`split`] on the blocking thread pool.
pub async fn split_async(
    archive: Bytes,
    policy: EmbargoPolicy,
    max_bytes: u64,
) -> Result<SplitOutput, SplitError> {
    tokio::task::spawn_blocking(move || split(&archive, &policy, max_bytes)).await?
}

fn gunzip(archive: &[u8], max_bytes: u64) -> Result<Vec<u8>, SplitError> {
    let mut tar_bytes = Vec::new();
    MultiGzDecoder::new(archive)
        .take(max_bytes + 1)
        .read_to_end(&mut tar_bytes)?;
    if tar_bytes.len() as u64 > max_bytes {
        return Err(SplitError::TooLarge { limit: max_bytes });
    }
    Ok(tar_bytes)
}

fn basename(name: &[u8]) -> String {
    let start = name.iter().rposition(|b| *b == b'/').map_or(0, |i| i + 1);
    String::from_utf8_lossy(&name[start..]).into_owned()
}

/// Append a regular file under exactly `name`, without the path cleanup
/// `Builder::append_data` applies. Names longer than the header field go
/// through a GNU long-name entry first.
fn append_member(
    builder: &mut Builder<Vec<u8>>,
    name: &[u8],
    mode: u32,
    mtime: u64,
    content: &[u8],
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    let field_len = header.as_old().name.len();
    if name.len() > field_len {
        let mut long_name = Header::new_gnu();
        long_name.as_old_mut().name[..LONG_LINK.len()].copy_from_slice(LONG_LINK);
        long_name.set_mode(0o644);
        long_name.set_uid(0);
        long_name.set_gid(0);
        long_name.set_mtime(0);
        // GNU tar counts the trailing NUL.
        long_name.set_size(name.len() as u64 + 1);
        long_name.set_entry_type(EntryType::GNULongName);
        long_name.set_cksum();
        builder.append(&long_name, name.chain(&[0u8][..]))?;
    }

    let stored = name.len().min(field_len);
    header.as_old_mut().name[..stored].copy_from_slice(&name[..stored]);
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append(&header, content)
}

// Default gzip header: no name, mtime 0. Same input, same bytes.
fn gzip(tar_bytes: Vec<u8>) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes)?;
    encoder.finish()
}
