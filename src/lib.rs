//! Block descriptors
//!
//! Every block in object storage carries one `meta.json` describing what
//! the block is, where it came from and which files it holds. Sidecars,
//! compactors and store gateways never talk to each other directly; they
//! agree on a block only through this file.
//!
//! ## Features
//!
//! - **Byte-stable encoding**: equal descriptors always encode to equal bytes,
//!   so the encoding can be content-hashed
//! - **Forward compatible**: unknown keys are ignored on decode
//! - **Validated both ways**: semantic checks run after decode and before encode
//! - **Atomic publish**: saves go through a fsynced temp file and a rename
//!
//! ## Layout
//!
//! ```text
//! 01ARZ3NDEKTSV4RRFFQ69G5FAV/
//! ├── chunks/
//! │   └── 000001
//! ├── index
//! └── meta.json
//! ```

pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod id;
pub mod persist;
pub mod schema;
pub mod validate;

pub use checksum::ContentHash;
pub use codec::{decode, encode};
pub use config::{MetaConfig, StoreConfig};
pub use error::{MetaError, Result};
pub use id::{BlockId, ParseIdError};
pub use persist::{read, save, write, DescriptorStore, StagedDescriptor};
pub use schema::{
    BlockDesc, BlockDescriptor, BlockMeta, BlockStats, Compaction, Downsample, Extension,
    FileEntry, KnownSource, META_FILENAME, SUPPORTED_VERSION,
};
pub use validate::validate;
