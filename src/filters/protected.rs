//! Protected-resources collector: computes the set of digests representing
//! in-image metadata that filters must never rewrite or unlink.
//!
//! Full OCI manifest parsing (the `oci-layout`/`index.json` conventions) is
//! out of scope per the external-collaborators boundary; callers supply the
//! minimal descriptor graph below, grounded in
//! `original_source/.../cmds/finalize.py`'s
//! `_collect_protected_resources_digest`.

use crate::digest::Digest;
use std::collections::HashSet;

/// A manifest reachable from the top-level index.
pub enum ManifestDescriptor {
    /// A per-ECU image manifest: references file-table layers, an image
    /// config (which may itself reference a sys-config and its own
    /// file-table digest).
    Image {
        digest: Digest,
        file_table_layers: Vec<Digest>,
        image_config_digest: Digest,
        sys_config_digest: Option<Digest>,
        image_config_file_table_digest: Digest,
    },
    /// An otaclient-package manifest: references a config and payload
    /// layers.
    OtaClientPackage {
        digest: Digest,
        config_digest: Digest,
        payload_digests: Vec<Digest>,
    },
}

/// Collect every digest that must never be bundled, compressed, or sliced:
/// manifest descriptors themselves, their file-table/config references,
/// and (by convention) the resource-table blob's own digest.
pub fn collect_protected_resources(
    manifests: &[ManifestDescriptor],
    resource_table_digest: Option<Digest>,
) -> HashSet<Digest> {
    let mut protected = HashSet::new();
    for manifest in manifests {
        match manifest {
            ManifestDescriptor::Image {
                digest,
                file_table_layers,
                image_config_digest,
                sys_config_digest,
                image_config_file_table_digest,
            } => {
                protected.insert(*digest);
                protected.extend(file_table_layers.iter().copied());
                protected.insert(*image_config_digest);
                if let Some(sys_config) = sys_config_digest {
                    protected.insert(*sys_config);
                }
                protected.insert(*image_config_file_table_digest);
            }
            ManifestDescriptor::OtaClientPackage {
                digest,
                config_digest,
                payload_digests,
            } => {
                protected.insert(*digest);
                protected.insert(*config_digest);
                protected.extend(payload_digests.iter().copied());
            }
        }
    }
    if let Some(rst) = resource_table_digest {
        protected.insert(rst);
    }
    protected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_manifest_contributes_all_referenced_digests() {
        let manifests = vec![ManifestDescriptor::Image {
            digest: Digest::of(b"manifest"),
            file_table_layers: vec![Digest::of(b"layer1"), Digest::of(b"layer2")],
            image_config_digest: Digest::of(b"config"),
            sys_config_digest: Some(Digest::of(b"sys_config")),
            image_config_file_table_digest: Digest::of(b"config_file_table"),
        }];
        let protected = collect_protected_resources(&manifests, Some(Digest::of(b"rst")));
        assert!(protected.contains(&Digest::of(b"manifest")));
        assert!(protected.contains(&Digest::of(b"layer1")));
        assert!(protected.contains(&Digest::of(b"layer2")));
        assert!(protected.contains(&Digest::of(b"config")));
        assert!(protected.contains(&Digest::of(b"sys_config")));
        assert!(protected.contains(&Digest::of(b"config_file_table")));
        assert!(protected.contains(&Digest::of(b"rst")));
        assert_eq!(protected.len(), 7);
    }

    #[test]
    fn otaclient_package_contributes_config_and_payloads() {
        let manifests = vec![ManifestDescriptor::OtaClientPackage {
            digest: Digest::of(b"otaclient_manifest"),
            config_digest: Digest::of(b"otaclient_config"),
            payload_digests: vec![Digest::of(b"payload1")],
        }];
        let protected = collect_protected_resources(&manifests, None);
        assert_eq!(protected.len(), 3);
    }
}
