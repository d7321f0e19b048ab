//! Canonical JSON encoding of block descriptors
//!
//! ## Wire layout
//!
//! ```text
//! {
//!   "ulid": ..., "minTime": ..., "maxTime": ...,   <- BlockMeta, flattened
//!   "stats": {...}, "compaction": {...}, "version": 1,
//!   "thanos": {...}                                 <- Extension, nested
//! }
//! ```
//!
//! Keys are written in declaration order with two-space indentation and a
//! trailing newline, so equal descriptors always encode to equal bytes.
//!
//! Decoding runs in stages: JSON syntax (`Parse`), version gate and typed
//! field decoding (`Schema`), then identifier parsing and semantic checks
//! (`Validation`). Unknown keys are ignored at every level.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{MetaError, Result};
use crate::id::BlockId;
use crate::schema::{
    BlockDesc, BlockDescriptor, BlockMeta, BlockStats, Compaction, Extension, SUPPORTED_VERSION,
};
use crate::validate;

/// Encode a descriptor into its canonical form
///
/// The descriptor is validated first; nothing is produced on failure.
pub fn encode(descriptor: &BlockDescriptor) -> Result<Vec<u8>> {
    validate::validate(descriptor)?;

    let block = &descriptor.block;
    let doc = MetaDoc {
        ulid: block.id,
        min_time: block.min_time,
        max_time: block.max_time,
        stats: &block.stats,
        compaction: &block.compaction,
        version: block.version,
        thanos: &descriptor.extension,
    };

    let mut buf = Vec::with_capacity(1024);
    serde_json::to_writer_pretty(&mut buf, &doc).map_err(|e| MetaError::Schema(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

/// Decode and validate a descriptor from raw bytes
pub fn decode(bytes: &[u8]) -> Result<BlockDescriptor> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| MetaError::Parse(e.to_string()))?;

    check_version(&value)?;

    let raw = RawMeta::deserialize(value).map_err(|e| MetaError::Schema(e.to_string()))?;
    let descriptor = raw.into_descriptor()?;

    validate::validate(&descriptor)?;
    Ok(descriptor)
}

fn check_version(value: &Value) -> Result<()> {
    let object = value
        .as_object()
        .ok_or_else(|| MetaError::Schema("descriptor must be a JSON object".to_string()))?;
    let version = object
        .get("version")
        .ok_or_else(|| MetaError::Schema("missing field `version`".to_string()))?;
    let version: u32 =
        integral::deserialize(version).map_err(|e| MetaError::Schema(format!("version: {e}")))?;

    if version != SUPPORTED_VERSION {
        return Err(MetaError::Schema(format!(
            "unsupported version {version}, expected {SUPPORTED_VERSION}"
        )));
    }
    Ok(())
}

fn parse_id(field: impl FnOnce() -> String, text: &str) -> Result<BlockId> {
    text.parse()
        .map_err(|e| MetaError::validation(field(), format!("{text:?} is not a block id: {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetaDoc<'a> {
    ulid: BlockId,
    min_time: i64,
    max_time: i64,
    stats: &'a BlockStats,
    compaction: &'a Compaction,
    version: u32,
    thanos: &'a Extension,
}

// Identifiers are decoded as plain strings so a malformed id surfaces as a
// validation failure naming the field rather than a type error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    ulid: String,
    #[serde(deserialize_with = "integral::deserialize")]
    min_time: i64,
    #[serde(deserialize_with = "integral::deserialize")]
    max_time: i64,
    #[serde(default, deserialize_with = "nullable")]
    stats: BlockStats,
    #[serde(default, deserialize_with = "nullable")]
    compaction: RawCompaction,
    #[serde(deserialize_with = "integral::deserialize")]
    version: u32,
    #[serde(default, deserialize_with = "nullable")]
    thanos: Extension,
}

#[derive(Deserialize, Default)]
struct RawCompaction {
    #[serde(default, deserialize_with = "integral::deserialize")]
    level: u32,
    #[serde(default, deserialize_with = "nullable")]
    sources: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    parents: Vec<RawBlockDesc>,
    #[serde(default)]
    failed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlockDesc {
    ulid: String,
    #[serde(deserialize_with = "integral::deserialize")]
    min_time: i64,
    #[serde(deserialize_with = "integral::deserialize")]
    max_time: i64,
}

impl RawMeta {
    fn into_descriptor(self) -> Result<BlockDescriptor> {
        let id = parse_id(|| "ulid".to_string(), &self.ulid)?;

        let sources = self
            .compaction
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| parse_id(|| format!("compaction.sources[{i}]"), s))
            .collect::<Result<Vec<_>>>()?;

        let parents = self
            .compaction
            .parents
            .iter()
            .enumerate()
            .map(|(i, p)| -> Result<BlockDesc> {
                Ok(BlockDesc {
                    ulid: parse_id(|| format!("compaction.parents[{i}].ulid"), &p.ulid)?,
                    min_time: p.min_time,
                    max_time: p.max_time,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BlockDescriptor {
            block: BlockMeta {
                id,
                min_time: self.min_time,
                max_time: self.max_time,
                stats: self.stats,
                compaction: Compaction {
                    level: self.compaction.level,
                    sources,
                    parents,
                    failed: self.compaction.failed,
                },
                version: self.version,
            },
            extension: self.thanos,
        })
    }
}

/// Treat an explicit `null` like an absent field
///
/// Older writers emitted `null` for empty collections.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Integer decoding that tolerates integral floats
///
/// `1000` and `1000.0` both decode to `1000`; `1000.5`, non-finite values,
/// floats of magnitude 2^53 or more and out-of-range values are rejected.
pub(crate) mod integral {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{self, Unexpected, Visitor};
    use serde::Deserializer;

    // 2^53. A float at or beyond it may already be a rounded neighbour of
    // the integer the writer meant.
    const EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64> + TryFrom<i64>,
    {
        deserializer.deserialize_any(IntegralVisitor(PhantomData))
    }

    struct IntegralVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for IntegralVisitor<T>
    where
        T: TryFrom<u64> + TryFrom<i64>,
    {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer in range")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<T, E> {
            <T as TryFrom<u64>>::try_from(v)
                .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<T, E> {
            <T as TryFrom<i64>>::try_from(v)
                .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<T, E> {
            if !v.is_finite() || v.fract() != 0.0 {
                return Err(E::invalid_value(Unexpected::Float(v), &self));
            }
            if v.abs() >= EXACT_LIMIT {
                Err(E::invalid_value(Unexpected::Float(v), &self))
            } else if v >= 0.0 {
                self.visit_u64(v as u64)
            } else {
                self.visit_i64(v as i64)
            }
        }
    }
}
