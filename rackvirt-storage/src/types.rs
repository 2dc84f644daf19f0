//! Storage type definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Storage backend variant tag.
///
/// Dispatch is by this explicit tag rather than by backend name strings, so
/// match arms stay exhaustive when a variant is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// Local volume-group storage (block-based, single node or shared pool).
    Local,
    /// Replicated storage mirrored across two nodes.
    Replicated,
}

impl StorageType {
    /// All variants, in registration order.
    pub const ALL: [StorageType; 2] = [StorageType::Local, StorageType::Replicated];

    /// Whether volumes of this type must be mirrored across nodes.
    pub fn requires_replication(self) -> bool {
        matches!(self, StorageType::Replicated)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Local => write!(f, "local"),
            StorageType::Replicated => write!(f, "replicated"),
        }
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(StorageType::Local),
            "replicated" => Ok(StorageType::Replicated),
            other => Err(StorageError::UnknownStorageType(format!(
                "Attempted to initialise an unknown storage type: {}",
                other
            ))),
        }
    }
}

/// Disk bus driver presented to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiskDriver {
    /// Paravirtualized virtio-blk (default).
    #[default]
    Virtio,
    /// Emulated IDE.
    Ide,
    /// Emulated SCSI.
    Scsi,
    /// Emulated SATA.
    Sata,
}

/// Parse a human size string ("512", "512MB", "10GB") into whole megabytes.
///
/// Bare numbers are already megabytes. Fractions truncate toward zero.
pub fn parse_size_mb(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let (number, multiplier) = if let Some(n) = trimmed
        .strip_suffix("GB")
        .or_else(|| trimmed.strip_suffix("G"))
    {
        (n, 1024u64)
    } else if let Some(n) = trimmed
        .strip_suffix("MB")
        .or_else(|| trimmed.strip_suffix("M"))
    {
        (n, 1u64)
    } else {
        (trimmed, 1u64)
    };

    let parsed: f64 = number.trim().parse().map_err(|_| {
        StorageError::InvalidStorageConfiguration(format!("Invalid size: {}", value))
    })?;
    if parsed < 0.0 {
        return Err(StorageError::InvalidStorageConfiguration(format!(
            "Invalid size: {}",
            value
        )));
    }

    Ok((parsed * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_round_trip() {
        for ty in StorageType::ALL {
            assert_eq!(ty.to_string().parse::<StorageType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_storage_type_is_rejected() {
        let err = "ceph".parse::<StorageType>().unwrap_err();
        assert!(matches!(err, StorageError::UnknownStorageType(_)));
    }

    #[test]
    fn test_parse_size_mb() {
        assert_eq!(parse_size_mb("512").unwrap(), 512);
        assert_eq!(parse_size_mb("512MB").unwrap(), 512);
        assert_eq!(parse_size_mb("10GB").unwrap(), 10240);
        assert_eq!(parse_size_mb("1.5G").unwrap(), 1536);
        assert!(parse_size_mb("lots").is_err());
    }
}
