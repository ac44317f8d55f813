//! `filter_applied` tagged union: stable integer tags, msgpack-encoded.
//!
//! Decode by tag rather than leaning on any runtime type system, per the
//! closed tagged-union discipline this pipeline uses throughout (see also
//! [`crate::ingest`]'s dispatch-by-entry-type).

use crate::digest::Digest;
use crate::error::DbError;
use crate::registry::ResourceId;
use serde::{Deserialize, Serialize};

pub const TAG_COMPRESS: u8 = 1;
pub const TAG_BUNDLE: u8 = 2;
pub const TAG_SLICE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterApplied {
    Compress {
        resource_id: ResourceId,
        compression_alg: String,
    },
    Bundle {
        bundle_resource_id: ResourceId,
        offset: u64,
        len: u64,
    },
    Slice {
        slices: Vec<ResourceId>,
    },
}

/// On-the-wire shape: an explicit integer `tag` plus the fields relevant to
/// that tag. Decoding matches on `tag`, never on any derived enum
/// representation.
#[derive(Serialize, Deserialize)]
struct Wire {
    tag: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compression_alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bundle_resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    len: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slices: Option<Vec<ResourceId>>,
}

impl FilterApplied {
    pub fn compress(resource_id: ResourceId) -> Self {
        FilterApplied::Compress {
            resource_id,
            compression_alg: "zstd".to_string(),
        }
    }

    pub fn bundle(bundle_resource_id: ResourceId, offset: u64, len: u64) -> Self {
        FilterApplied::Bundle {
            bundle_resource_id,
            offset,
            len,
        }
    }

    pub fn slice(slices: Vec<ResourceId>) -> Self {
        FilterApplied::Slice { slices }
    }

    fn to_wire(&self) -> Wire {
        match self {
            FilterApplied::Compress {
                resource_id,
                compression_alg,
            } => Wire {
                tag: TAG_COMPRESS,
                resource_id: Some(*resource_id),
                compression_alg: Some(compression_alg.clone()),
                bundle_resource_id: None,
                offset: None,
                len: None,
                slices: None,
            },
            FilterApplied::Bundle {
                bundle_resource_id,
                offset,
                len,
            } => Wire {
                tag: TAG_BUNDLE,
                resource_id: None,
                compression_alg: None,
                bundle_resource_id: Some(*bundle_resource_id),
                offset: Some(*offset),
                len: Some(*len),
                slices: None,
            },
            FilterApplied::Slice { slices } => Wire {
                tag: TAG_SLICE,
                resource_id: None,
                compression_alg: None,
                bundle_resource_id: None,
                offset: None,
                len: None,
                slices: Some(slices.clone()),
            },
        }
    }

    fn from_wire(wire: Wire) -> Result<Self, DbError> {
        match wire.tag {
            TAG_COMPRESS => Ok(FilterApplied::Compress {
                resource_id: wire.resource_id.ok_or_else(|| {
                    DbError::Decode(rmp_serde::decode::Error::Syntax(
                        "missing resource_id in Compress filter_applied".into(),
                    ))
                })?,
                compression_alg: wire.compression_alg.unwrap_or_else(|| "zstd".to_string()),
            }),
            TAG_BUNDLE => Ok(FilterApplied::Bundle {
                bundle_resource_id: wire.bundle_resource_id.ok_or_else(|| {
                    DbError::Decode(rmp_serde::decode::Error::Syntax(
                        "missing bundle_resource_id in Bundle filter_applied".into(),
                    ))
                })?,
                offset: wire.offset.unwrap_or(0),
                len: wire.len.unwrap_or(0),
            }),
            TAG_SLICE => Ok(FilterApplied::Slice {
                slices: wire.slices.unwrap_or_default(),
            }),
            other => Err(DbError::Decode(rmp_serde::decode::Error::Syntax(format!(
                "unknown filter_applied tag {other}"
            )))),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DbError> {
        Ok(rmp_serde::to_vec_named(&self.to_wire())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DbError> {
        let wire: Wire = rmp_serde::from_slice(bytes)?;
        Self::from_wire(wire)
    }
}

/// A resource-table row, as returned by selection queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRow {
    pub resource_id: ResourceId,
    pub digest: Digest,
    pub size: u64,
    pub filter_applied: Option<FilterApplied>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_roundtrips() {
        let fa = FilterApplied::compress(42);
        let bytes = fa.encode().unwrap();
        assert_eq!(FilterApplied::decode(&bytes).unwrap(), fa);
    }

    #[test]
    fn bundle_roundtrips() {
        let fa = FilterApplied::bundle(7, 128, 64);
        let bytes = fa.encode().unwrap();
        assert_eq!(FilterApplied::decode(&bytes).unwrap(), fa);
    }

    #[test]
    fn slice_roundtrips_preserving_order() {
        let fa = FilterApplied::slice(vec![3, 1, 4, 1, 5]);
        let bytes = fa.encode().unwrap();
        assert_eq!(FilterApplied::decode(&bytes).unwrap(), fa);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let wire = Wire {
            tag: 99,
            resource_id: None,
            compression_alg: None,
            bundle_resource_id: None,
            offset: None,
            len: None,
            slices: None,
        };
        let bytes = rmp_serde::to_vec_named(&wire).unwrap();
        assert!(FilterApplied::decode(&bytes).is_err());
    }
}
