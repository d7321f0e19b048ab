//! Block descriptor types
//!
//! A [`BlockDescriptor`] is the composition of two records: the base
//! [`BlockMeta`] inherited from the TSDB block format and the
//! [`Extension`] carried under the `thanos` key. The codec flattens the
//! base record into the top level of `meta.json` and nests the extension.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{integral, nullable};
use crate::id::BlockId;

/// The only descriptor format version this crate reads or writes
pub const SUPPORTED_VERSION: u32 = 1;

/// Canonical descriptor filename inside a block directory
pub const META_FILENAME: &str = "meta.json";

/// A complete block descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Fields shared with the underlying TSDB block format
    pub block: BlockMeta,
    /// Storage-system specific fields
    pub extension: Extension,
}

/// Base record: identity, bounds, statistics and lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub id: BlockId,
    /// Inclusive lower bound in milliseconds
    pub min_time: i64,
    /// Upper bound in milliseconds
    pub max_time: i64,
    pub stats: BlockStats,
    pub compaction: Compaction,
    /// Descriptor format version, see [`SUPPORTED_VERSION`]
    pub version: u32,
}

/// Informational counters about block content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    #[serde(default, deserialize_with = "integral::deserialize")]
    pub num_samples: u64,
    #[serde(default, deserialize_with = "integral::deserialize")]
    pub num_series: u64,
    #[serde(default, deserialize_with = "integral::deserialize")]
    pub num_chunks: u64,
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "integral::deserialize"
    )]
    pub num_tombstones: u64,
}

/// Compaction lineage of a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Compaction {
    /// 1 for blocks written by an ingester, greater once merged
    pub level: u32,
    /// Every leaf block whose data this block covers
    pub sources: Vec<BlockId>,
    /// Direct inputs of the compaction that produced this block
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<BlockDesc>,
    #[serde(skip_serializing_if = "is_false")]
    pub failed: bool,
}

/// Reference to a parent block together with its time bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDesc {
    pub ulid: BlockId,
    pub min_time: i64,
    pub max_time: i64,
}

/// Extension record stored under the `thanos` key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    /// External labels of the producing source; omitted when empty
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "nullable"
    )]
    pub labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable")]
    pub downsample: Downsample,
    /// Tag of the component that produced the block
    #[serde(default, deserialize_with = "nullable")]
    pub source: String,
    /// Files making up the block, in producer order
    #[serde(default, deserialize_with = "nullable")]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downsample {
    /// Step in milliseconds, 0 for raw data
    #[serde(default, deserialize_with = "integral::deserialize")]
    pub resolution: u64,
}

/// One file of a block, relative to the block directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub rel_path: String,
    /// Size in bytes; 0 means the size was not recorded
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "integral::deserialize"
    )]
    pub size_bytes: u64,
}

/// Provenance tags written by the components of the storage system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownSource {
    Sidecar,
    Receive,
    Compactor,
    CompactorRepair,
    Ruler,
    BucketRepair,
    Test,
}

impl KnownSource {
    pub const ALL: [KnownSource; 7] = [
        KnownSource::Sidecar,
        KnownSource::Receive,
        KnownSource::Compactor,
        KnownSource::CompactorRepair,
        KnownSource::Ruler,
        KnownSource::BucketRepair,
        KnownSource::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnownSource::Sidecar => "sidecar",
            KnownSource::Receive => "receive",
            KnownSource::Compactor => "compactor",
            KnownSource::CompactorRepair => "compactor.repair",
            KnownSource::Ruler => "ruler",
            KnownSource::BucketRepair => "bucket.repair",
            KnownSource::Test => "test",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == tag)
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl BlockDescriptor {
    /// Descriptor for a freshly written leaf block
    ///
    /// The block lists itself as its only source, at compaction level 1.
    pub fn new_leaf(id: BlockId, min_time: i64, max_time: i64, extension: Extension) -> Self {
        Self {
            block: BlockMeta {
                id,
                min_time,
                max_time,
                stats: BlockStats::default(),
                compaction: Compaction::leaf(id),
                version: SUPPORTED_VERSION,
            },
            extension,
        }
    }

    pub fn id(&self) -> BlockId {
        self.block.id
    }

    /// Length of the covered time range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.block.max_time.saturating_sub(self.block.min_time)
    }

    pub fn is_downsampled(&self) -> bool {
        self.extension.downsample.resolution > 0
    }

    /// Whether this block's data covers `other`, making `other` safe to drop
    pub fn supersedes(&self, other: &BlockDescriptor) -> bool {
        self.id() != other.id() && self.block.compaction.sources.contains(&other.id())
    }
}

impl Compaction {
    pub fn leaf(id: BlockId) -> Self {
        Self {
            level: 1,
            sources: vec![id],
            parents: Vec::new(),
            failed: false,
        }
    }

    /// Lineage of a block merged from `parents`
    ///
    /// Sources are the sorted union of all parent sources and the level is
    /// one above the highest parent level.
    pub fn merged<'a>(parents: impl IntoIterator<Item = &'a BlockDescriptor>) -> Self {
        let mut level = 0;
        let mut sources = Vec::new();
        let mut descs = Vec::new();
        for parent in parents {
            level = level.max(parent.block.compaction.level);
            sources.extend_from_slice(&parent.block.compaction.sources);
            descs.push(BlockDesc {
                ulid: parent.id(),
                min_time: parent.block.min_time,
                max_time: parent.block.max_time,
            });
        }
        sources.sort();
        sources.dedup();
        Self {
            level: level + 1,
            sources,
            parents: descs,
            failed: false,
        }
    }
}

impl Extension {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_resolution(mut self, resolution: u64) -> Self {
        self.downsample.resolution = resolution;
        self
    }

    pub fn with_file(mut self, file: FileEntry) -> Self {
        self.files.push(file);
        self
    }

    /// Look up a manifest entry by relative path
    pub fn file(&self, rel_path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.rel_path == rel_path)
    }

    pub fn known_source(&self) -> Option<KnownSource> {
        KnownSource::from_tag(&self.source)
    }
}

impl FileEntry {
    pub fn new(rel_path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            rel_path: rel_path.into(),
            size_bytes,
        }
    }

    /// Entry whose size is not known, such as the descriptor itself
    pub fn unrecorded(rel_path: impl Into<String>) -> Self {
        Self::new(rel_path, 0)
    }

    pub fn size(&self) -> Option<u64> {
        (self.size_bytes > 0).then_some(self.size_bytes)
    }
}
