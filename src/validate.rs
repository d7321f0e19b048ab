//! Semantic checks on block descriptors
//!
//! Runs after every decode and before every encode. Checks are independent;
//! the first violation found is reported with the wire path of the field.

use std::collections::HashSet;

use crate::error::{MetaError, Result};
use crate::schema::{BlockDescriptor, SUPPORTED_VERSION};

/// Validate a descriptor
pub fn validate(descriptor: &BlockDescriptor) -> Result<()> {
    let block = &descriptor.block;

    if block.version != SUPPORTED_VERSION {
        return Err(MetaError::validation(
            "version",
            format!("{} is not supported, expected {SUPPORTED_VERSION}", block.version),
        ));
    }

    check_range("maxTime", block.min_time, block.max_time)?;

    let compaction = &block.compaction;
    if compaction.level < 1 {
        return Err(MetaError::validation("compaction.level", "must be at least 1"));
    }
    if compaction.sources.is_empty() {
        return Err(MetaError::validation("compaction.sources", "must not be empty"));
    }
    for (i, parent) in compaction.parents.iter().enumerate() {
        check_range(
            &format!("compaction.parents[{i}].maxTime"),
            parent.min_time,
            parent.max_time,
        )?;
    }

    let mut seen = HashSet::with_capacity(descriptor.extension.files.len());
    for (i, file) in descriptor.extension.files.iter().enumerate() {
        if file.rel_path.is_empty() {
            return Err(MetaError::validation(
                format!("thanos.files[{i}].rel_path"),
                "must not be empty",
            ));
        }
        if !seen.insert(file.rel_path.as_str()) {
            return Err(MetaError::validation(
                format!("thanos.files[{i}].rel_path"),
                format!("duplicate path {:?}", file.rel_path),
            ));
        }
    }

    Ok(())
}

fn check_range(field: &str, min: i64, max: i64) -> Result<()> {
    if min > max {
        return Err(MetaError::validation(
            field,
            format!("{max} is before minTime {min}"),
        ));
    }
    Ok(())
}
