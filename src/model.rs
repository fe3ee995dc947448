//! Frozen cluster sets and their on-disk form.
//!
//! A [`ClusterSet`] is written in the safetensors layout:
//!
//! ```text
//! [u64 LE header length][JSON header, space padded to 8 bytes][payload]
//! ```
//!
//! The header holds one `F32` tensor, `centers`, of shape `[k, n_channels]`,
//! plus a `__metadata__` string map carrying the fit metadata as JSON. Center
//! values are stored as raw little-endian `f32`, so a save/load round trip is
//! bit-exact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::util::{check_dimensions, normalize_in_place};
use crate::error::{Error, Result};
use crate::pipeline::FitOptions;

const FORMAT_TAG: &str = "microstates/cluster-set";

/// Provenance of a cluster set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// Channel count every center (and every backfitted sample) must have.
    pub n_channels: usize,
    /// Options the set was fitted with.
    pub options: FitOptions,
    /// Total GEV on the fitting data; `None` for hand-built sets.
    pub gev: Option<f64>,
    /// Whether the fit met its convergence criterion.
    pub converged: bool,
    /// Seed of the winning restart. Refitting with this seed and one restart
    /// reproduces the centers.
    pub seed: Option<u64>,
}

/// `k` unit-norm cluster centers and the metadata of the fit that produced
/// them. Immutable: the editing operations return a new set.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSet {
    centers: Vec<Vec<f32>>,
    metadata: ClusterMetadata,
}

impl ClusterSet {
    pub(crate) fn new(centers: Vec<Vec<f32>>, metadata: ClusterMetadata) -> Self {
        Self { centers, metadata }
    }

    /// Build a set from externally supplied maps (e.g. published templates).
    ///
    /// Each map is scaled to unit norm.
    pub fn from_centers(centers: Vec<Vec<f32>>) -> Result<Self> {
        let n_channels = check_dimensions(&centers)?;
        let mut unit = centers;
        for (i, c) in unit.iter_mut().enumerate() {
            if !normalize_in_place(c) {
                return Err(Error::DegenerateVector { index: i });
            }
        }
        Ok(Self {
            centers: unit,
            metadata: ClusterMetadata {
                n_channels,
                options: FitOptions::default(),
                gev: None,
                converged: true,
                seed: None,
            },
        })
    }

    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.centers.len()
    }

    /// Channels per center.
    pub fn n_channels(&self) -> usize {
        self.metadata.n_channels
    }

    /// All centers, cluster index order.
    pub fn centers(&self) -> &[Vec<f32>] {
        &self.centers
    }

    /// One center.
    pub fn center(&self, index: usize) -> Option<&[f32]> {
        self.centers.get(index).map(Vec::as_slice)
    }

    /// Fit provenance.
    pub fn metadata(&self) -> &ClusterMetadata {
        &self.metadata
    }

    /// Permute the clusters: new cluster `i` is old cluster `order[i]`.
    pub fn reorder(self, order: &[usize]) -> Result<Self> {
        let k = self.k();
        if order.len() != k {
            return Err(Error::InvalidParameter {
                name: "order",
                message: "must list every cluster exactly once",
            });
        }
        let mut seen = vec![false; k];
        for &o in order {
            if o >= k || seen[o] {
                return Err(Error::InvalidParameter {
                    name: "order",
                    message: "must list every cluster exactly once",
                });
            }
            seen[o] = true;
        }
        let centers = order.iter().map(|&o| self.centers[o].clone()).collect();
        Ok(Self {
            centers,
            metadata: self.metadata,
        })
    }

    /// Flip the sign of one center. Labels and correlations are unaffected;
    /// only the displayed polarity changes.
    pub fn invert_polarity(mut self, index: usize) -> Result<Self> {
        let Some(center) = self.centers.get_mut(index) else {
            return Err(Error::InvalidParameter {
                name: "index",
                message: "cluster index out of range",
            });
        };
        center.iter_mut().for_each(|v| *v = -*v);
        Ok(self)
    }

    /// Serialize to the safetensors layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload: Vec<u8> = self
            .centers
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let mut metadata = BTreeMap::new();
        metadata.insert("format".to_string(), FORMAT_TAG.to_string());
        metadata.insert("cluster_set".to_string(), serde_json::to_string(&self.metadata)?);

        let header = Header {
            metadata,
            centers: TensorEntry {
                dtype: "F32".to_string(),
                shape: [self.k(), self.n_channels()],
                data_offsets: [0, payload.len()],
            },
        };
        let mut hdr_bytes = serde_json::to_vec(&header)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        hdr_bytes.extend(std::iter::repeat(b' ').take(pad));

        let mut out = Vec::with_capacity(8 + hdr_bytes.len() + payload.len());
        out.extend_from_slice(&(hdr_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&hdr_bytes);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse the safetensors layout written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let len_bytes: [u8; 8] = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Format("file too small".into()))?;
        let hdr_len = usize::try_from(u64::from_le_bytes(len_bytes))
            .map_err(|_| Error::Format("header length overflows".into()))?;
        let data_start = 8usize
            .checked_add(hdr_len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| Error::Format("header extends past end of file".into()))?;

        let header: Header = serde_json::from_slice(&bytes[8..data_start])?;
        if header.metadata.get("format").map(String::as_str) != Some(FORMAT_TAG) {
            return Err(Error::Format("missing or unknown format tag".into()));
        }
        let meta_json = header
            .metadata
            .get("cluster_set")
            .ok_or_else(|| Error::Format("missing cluster_set metadata".into()))?;
        let metadata: ClusterMetadata = serde_json::from_str(meta_json)?;

        let entry = &header.centers;
        if entry.dtype != "F32" {
            return Err(Error::Format(format!("unsupported dtype {}", entry.dtype)));
        }
        let [k, c] = entry.shape;
        if k == 0 || c == 0 || c != metadata.n_channels {
            return Err(Error::Format("center shape does not match metadata".into()));
        }
        let [s, e] = entry.data_offsets;
        let expected = k
            .checked_mul(c)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::Format("center tensor too large".into()))?;
        if e < s || e - s != expected {
            return Err(Error::Format("center byte range does not match shape".into()));
        }
        let raw = data_start
            .checked_add(e)
            .filter(|&end| end <= bytes.len())
            .map(|end| &bytes[data_start + s..end])
            .ok_or_else(|| Error::Format("center data extends past end of file".into()))?;

        let values: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let centers = values.chunks_exact(c).map(<[f32]>::to_vec).collect();

        Ok(Self { centers, metadata })
    }

    /// Write to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Read a set written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TensorEntry {
    dtype: String,
    shape: [usize; 2],
    data_offsets: [usize; 2],
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "__metadata__")]
    metadata: BTreeMap<String, String>,
    centers: TensorEntry,
}
