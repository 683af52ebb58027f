//! Visual vocabulary: cluster centroids built once, shared read-only
//!
//! Binary layout (little-endian):
//! ```text
//! magic u32 | format u32 | fingerprint u64 | num_clusters u32 | dim u32
//! num_clusters × (members u64 | dim × f64)
//! ```
//! Centroid components are stored as raw `f64` bits and round-trip exactly.

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::features::Distance;

/// Magic number for vocabulary files
const VOCABULARY_MAGIC: u32 = 0x43565756; // "VWVC" - Visual Word Vocabulary Centroids

/// Current on-disk format
const FORMAT_VERSION: u32 = 1;

const HEADER_BYTES: usize = 4 + 4 + 8 + 4 + 4;

/// One visual word
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    mean: Vec<f64>,
    /// Local features assigned in the final clustering step
    members: u64,
}

impl Cluster {
    pub fn new(mean: Vec<f64>, members: u64) -> Self {
        Self { mean, members }
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn members(&self) -> u64 {
        self.members
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    #[inline]
    pub fn distance(&self, feature: &[f64], distance: Distance) -> f64 {
        distance.eval(&self.mean, feature)
    }
}

/// Fixed-size ordered set of clusters
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    clusters: Vec<Cluster>,
    dim: usize,
    fingerprint: u64,
}

impl Vocabulary {
    /// Build a vocabulary, checking that every centroid has the same length
    pub fn new(clusters: Vec<Cluster>) -> Result<Self> {
        let Some(first) = clusters.first() else {
            return Err(Error::Config("vocabulary needs at least one cluster".to_string()));
        };
        let dim = first.dim();
        if dim == 0 {
            return Err(Error::Config("centroids must not be empty".to_string()));
        }
        if let Some(bad) = clusters.iter().find(|c| c.dim() != dim) {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: bad.dim(),
            });
        }
        let fingerprint = compute_fingerprint(&clusters, dim);
        Ok(Self {
            clusters,
            dim,
            fingerprint,
        })
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, idx: usize) -> &Cluster {
        &self.clusters[idx]
    }

    /// Hash of cluster count, dimension and every centroid bit pattern
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn fingerprint_hex(&self) -> String {
        format!("{:016x}", self.fingerprint)
    }

    /// Index of the nearest cluster, ties resolved to the lowest index
    pub fn nearest(&self, feature: &[f64], distance: Distance) -> usize {
        let mut best_idx = 0;
        let mut best_dist = f64::INFINITY;
        for (idx, cluster) in self.clusters.iter().enumerate() {
            let dist = cluster.distance(feature, distance);
            if dist < best_dist {
                best_dist = dist;
                best_idx = idx;
            }
        }
        best_idx
    }

    /// Save to `path`, replacing any existing file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("vwv.tmp");
        {
            let mut file = io::BufWriter::new(std::fs::File::create(&tmp)?);
            self.write_to(&mut file)?;
            file.flush()?;
            file.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Write to any writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(VOCABULARY_MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u64::<LittleEndian>(self.fingerprint)?;
        writer.write_u32::<LittleEndian>(self.clusters.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.dim as u32)?;

        for cluster in &self.clusters {
            writer.write_u64::<LittleEndian>(cluster.members)?;
            for &val in &cluster.mean {
                writer.write_f64::<LittleEndian>(val)?;
            }
        }

        Ok(())
    }

    /// Load from a file written by [`Vocabulary::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::VocabularyNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_bytes(&data)
    }

    /// Read from any reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        if magic != VOCABULARY_MAGIC {
            return Err(Error::Corruption(
                "invalid vocabulary file magic".to_string(),
            ));
        }

        let format = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        if format > FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported vocabulary format {format}"
            )));
        }
        let stored_fingerprint = reader.read_u64::<LittleEndian>().map_err(truncated)?;
        let num_clusters = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let dim = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        if num_clusters == 0 || dim == 0 {
            return Err(Error::Corruption(format!(
                "empty vocabulary header ({num_clusters} clusters × {dim} dims)"
            )));
        }

        let mut clusters = Vec::with_capacity(num_clusters.min(1 << 16));
        for _ in 0..num_clusters {
            let members = reader.read_u64::<LittleEndian>().map_err(truncated)?;
            let mut mean = vec![0.0f64; dim];
            reader
                .read_f64_into::<LittleEndian>(&mut mean)
                .map_err(truncated)?;
            clusters.push(Cluster { mean, members });
        }

        let vocabulary = Self::new(clusters)?;
        if vocabulary.fingerprint != stored_fingerprint {
            return Err(Error::Corruption(format!(
                "fingerprint mismatch: header {:016x}, centroids {:016x}",
                stored_fingerprint, vocabulary.fingerprint
            )));
        }
        Ok(vocabulary)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_bytes());
        // Vec<u8> writes are infallible
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Deserialize from bytes, rejecting trailing data
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let vocabulary = Self::read_from(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != data.len() {
            return Err(Error::Corruption(format!(
                "{} trailing bytes after vocabulary",
                data.len() - consumed
            )));
        }
        Ok(vocabulary)
    }

    /// Serialized size in bytes
    pub fn size_bytes(&self) -> usize {
        HEADER_BYTES + self.clusters.len() * (8 + self.dim * 8)
    }
}

fn truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Corruption("vocabulary file is truncated".to_string())
    } else {
        Error::Io(err)
    }
}

/// First 8 bytes of SHA-256 over `k`, `dim` and the centroid bits, so the
/// value is identical on every platform
fn compute_fingerprint(clusters: &[Cluster], dim: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update((clusters.len() as u64).to_le_bytes());
    hasher.update((dim as u64).to_le_bytes());
    for cluster in clusters {
        for &v in &cluster.mean {
            hasher.update(v.to_le_bytes());
        }
    }
    let digest: [u8; 32] = hasher.finalize().into();
    LittleEndian::read_u64(&digest[..8])
}
