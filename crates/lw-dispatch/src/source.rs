//! [`Source`] addressing: a transport tag plus an address whose syntax is
//! transport-dependent.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The transport a [`Source`] is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A local path, transferred by copy.
    Direct,
    /// A local path, transferred by symlink.
    Symlink,
    /// A batch grid-transfer endpoint (e.g. a managed data-transfer service).
    LocalBatch,
    /// A path reachable by executing commands on a remote host's shell.
    RemoteShell,
    /// A path reachable over HTTP(S). Source-only; never a valid destination.
    Http,
}

impl SourceType {
    /// `true` for the two transports that only ever address the local
    /// filesystem of the running process.
    pub fn is_local(&self) -> bool {
        matches!(self, SourceType::Direct | SourceType::Symlink)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::Direct => "direct",
            SourceType::Symlink => "symlink",
            SourceType::LocalBatch => "local_batch",
            SourceType::RemoteShell => "remote_shell",
            SourceType::Http => "http",
        };
        f.write_str(s)
    }
}

/// A parsed batch-transfer endpoint address: `batch://endpoint-id:path`, or
/// an application URL carrying `origin_id`/`origin_path` (or
/// `destination_id`/`destination_path`) query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEndpoint {
    /// Opaque endpoint identifier understood by the batch-transfer CLI.
    pub endpoint: String,
    /// Path within that endpoint.
    pub path: PathBuf,
}

const BATCH_PREFIX: &str = "batch://";

impl BatchEndpoint {
    /// Parse a batch-transfer address, either the canonical `batch://` form
    /// or a portal-style URL with `origin_*`/`destination_*` query params.
    pub fn parse(address: &str) -> Result<Self, DispatchError> {
        if let Some(rest) = address.strip_prefix(BATCH_PREFIX) {
            let mut toks = rest.splitn(2, ':');
            let endpoint = toks.next().unwrap_or_default().to_string();
            let path = toks.next().unwrap_or_default();
            if endpoint.is_empty() || path.is_empty() {
                return Err(DispatchError::InvalidSource {
                    address: address.to_string(),
                    reason: "expected batch://ENDPOINT:PATH".into(),
                });
            }
            return Ok(Self {
                endpoint,
                path: PathBuf::from(path),
            });
        }

        let url = url::Url::parse(address).map_err(|e| DispatchError::InvalidSource {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(DispatchError::InvalidSource {
                address: address.to_string(),
                reason: "not a batch:// address or portal URL".into(),
            });
        }
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        let endpoint = pairs
            .get("origin_id")
            .or_else(|| pairs.get("destination_id"))
            .ok_or_else(|| DispatchError::InvalidSource {
                address: address.to_string(),
                reason: "missing origin_id/destination_id query parameter".into(),
            })?;
        let path = pairs
            .get("origin_path")
            .or_else(|| pairs.get("destination_path"))
            .ok_or_else(|| DispatchError::InvalidSource {
                address: address.to_string(),
                reason: "missing origin_path/destination_path query parameter".into(),
            })?;
        Ok(Self {
            endpoint: endpoint.clone(),
            path: PathBuf::from(path),
        })
    }
}

impl fmt::Display for BatchEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BATCH_PREFIX}{}:{}", self.endpoint, self.path.display())
    }
}

/// An addressable location plus the transport used to move data to or from
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Transport-dependent address string.
    pub address: String,
    /// Transport tag.
    #[serde(rename = "type")]
    pub transport: SourceType,
}

impl Source {
    /// Construct a `DIRECT` source from a local path.
    pub fn direct(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            transport: SourceType::Direct,
        }
    }

    /// Construct a source with an explicit transport.
    pub fn new(address: impl Into<String>, transport: SourceType) -> Self {
        Self {
            address: address.into(),
            transport,
        }
    }

    /// Stable short hash of this source's address and transport, used for
    /// per-endpoint-pair batching keys.
    pub fn hash_key(&self) -> String {
        lw_ident::KeyGenerator::from_str(&format!("{}{}", self.address, self.transport), 12)
    }

    /// Join a relative path segment onto this source's address, keeping the
    /// same transport. Mirrors path-joining semantics on an address string
    /// rather than a real filesystem path, since the address is
    /// transport-specific syntax, not always a local path.
    pub fn joined(&self, segment: &str) -> Result<Self, DispatchError> {
        if Path::new(segment).is_absolute() {
            return Err(DispatchError::InvalidSource {
                address: segment.to_string(),
                reason: "joined segment must be relative".into(),
            });
        }
        let base = self.address.strip_suffix('/').unwrap_or(&self.address);
        let seg = segment.strip_prefix('/').unwrap_or(segment);
        Ok(Self {
            address: format!("{base}/{seg}"),
            transport: self.transport,
        })
    }

    /// The final path component, with or without its extension.
    pub fn name(&self, extension: bool) -> String {
        let tail = self.address.rsplit(':').next().unwrap_or(&self.address);
        let p = Path::new(tail);
        if extension {
            p.file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            p.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.transport, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_source_name_with_and_without_extension() {
        let s = Source::direct("/data/reads/sample.fastq");
        assert_eq!(s.name(true), "sample.fastq");
        assert_eq!(s.name(false), "sample");
    }

    #[test]
    fn joined_rejects_absolute_segment() {
        let s = Source::direct("/data/reads");
        let err = s.joined("/abs").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSource { .. }));
    }

    #[test]
    fn joined_concatenates_relative_segment() {
        let s = Source::direct("/data/reads/");
        let joined = s.joined("sample.fastq").unwrap();
        assert_eq!(joined.address, "/data/reads/sample.fastq");
        assert_eq!(joined.transport, SourceType::Direct);
    }

    #[test]
    fn batch_endpoint_parses_canonical_form() {
        let ep = BatchEndpoint::parse("batch://site-a:/scratch/in").unwrap();
        assert_eq!(ep.endpoint, "site-a");
        assert_eq!(ep.path, PathBuf::from("/scratch/in"));
    }

    #[test]
    fn batch_endpoint_parses_portal_url() {
        let ep = BatchEndpoint::parse(
            "https://portal.example/transfer?origin_id=site-a&origin_path=%2Fscratch%2Fin",
        )
        .unwrap();
        assert_eq!(ep.endpoint, "site-a");
        assert_eq!(ep.path, PathBuf::from("/scratch/in"));
    }

    #[test]
    fn hash_key_is_stable_for_same_address_and_transport() {
        let a = Source::direct("/x");
        let b = Source::direct("/x");
        assert_eq!(a.hash_key(), b.hash_key());
        let c = Source::new("/x", SourceType::Symlink);
        assert_ne!(a.hash_key(), c.hash_key());
    }
}
