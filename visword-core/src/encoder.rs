//! Global descriptors from local features and a vocabulary
//!
//! BOVW counts nearest-cluster assignments; VLAD sums residuals to the
//! assigned centroid per cluster and L2-normalizes the concatenation.

use std::fmt::Write as _;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use crate::document::{Document, FieldValue};
use crate::error::{Error, Result};
use crate::features::{Distance, LocalFeatureSet};
use crate::structures::{EncodedFields, EncodingKind, Vocabulary};

/// Largest bin value after quantization
pub const QUANTIZED_MAX: u32 = 127;

/// Fixed-length descriptor of one document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodedDescriptor {
    /// One count per cluster
    Histogram(Vec<u32>),
    /// `num_clusters * dim` components, unit L2 norm or all zero
    Vlad(Vec<f64>),
}

impl EncodedDescriptor {
    pub fn kind(&self) -> EncodingKind {
        match self {
            EncodedDescriptor::Histogram(_) => EncodingKind::Bovw,
            EncodedDescriptor::Vlad(_) => EncodingKind::Vlad,
        }
    }

    pub fn dims(&self) -> usize {
        match self {
            EncodedDescriptor::Histogram(h) => h.len(),
            EncodedDescriptor::Vlad(v) => v.len(),
        }
    }

    pub fn as_histogram(&self) -> Option<&[u32]> {
        match self {
            EncodedDescriptor::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_vlad(&self) -> Option<&[f64]> {
        match self {
            EncodedDescriptor::Vlad(v) => Some(v),
            _ => None,
        }
    }

    /// Sparse visual-word tokens: each bin index in lowercase hex,
    /// repeated once per count
    ///
    /// `None` for VLAD, which has no token form.
    pub fn to_text(&self) -> Option<String> {
        let hist = self.as_histogram()?;
        let mut out = String::new();
        for (bin, &count) in hist.iter().enumerate() {
            for _ in 0..count {
                if !out.is_empty() {
                    out.push(' ');
                }
                // Writing to a String cannot fail
                let _ = write!(out, "{bin:x}");
            }
        }
        Some(out)
    }

    /// Dense little-endian bytes: `u32` per bin or `f64` per component
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            EncodedDescriptor::Histogram(h) => {
                let mut buf = Vec::with_capacity(h.len() * 4);
                for &v in h {
                    let _ = buf.write_u32::<LittleEndian>(v);
                }
                buf
            }
            EncodedDescriptor::Vlad(v) => {
                let mut buf = Vec::with_capacity(v.len() * 8);
                for &x in v {
                    let _ = buf.write_f64::<LittleEndian>(x);
                }
                buf
            }
        }
    }

    pub fn from_bytes(kind: EncodingKind, bytes: &[u8]) -> Result<Self> {
        let width = match kind {
            EncodingKind::Bovw => 4,
            EncodingKind::Vlad => 8,
        };
        if bytes.len() % width != 0 {
            return Err(Error::Codec(format!(
                "{} descriptor has invalid byte length {}",
                kind.name(),
                bytes.len()
            )));
        }
        let n = bytes.len() / width;
        let mut reader = Cursor::new(bytes);
        Ok(match kind {
            EncodingKind::Bovw => {
                let mut h = Vec::with_capacity(n);
                for _ in 0..n {
                    h.push(reader.read_u32::<LittleEndian>()?);
                }
                EncodedDescriptor::Histogram(h)
            }
            EncodingKind::Vlad => {
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(reader.read_f64::<LittleEndian>()?);
                }
                EncodedDescriptor::Vlad(v)
            }
        })
    }
}

/// Count nearest-cluster assignments
pub fn bovw_histogram(
    features: &LocalFeatureSet,
    vocabulary: &Vocabulary,
    distance: Distance,
) -> Vec<u32> {
    let mut hist = vec![0u32; vocabulary.num_clusters()];
    for f in features.iter() {
        hist[vocabulary.nearest(f, distance)] += 1;
    }
    hist
}

/// Rescale bins to `[0, QUANTIZED_MAX]` relative to the largest bin
pub fn quantize_histogram(hist: &mut [u32]) {
    let max = hist.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return;
    }
    for bin in hist.iter_mut() {
        *bin = ((QUANTIZED_MAX as u64 * *bin as u64) / max as u64) as u32;
    }
}

/// Per-cluster residual sums, L2-normalized
pub fn vlad_vector(
    features: &LocalFeatureSet,
    vocabulary: &Vocabulary,
    distance: Distance,
) -> Vec<f64> {
    let dim = vocabulary.dim();
    let mut vlad = vec![0.0f64; vocabulary.num_clusters() * dim];
    for f in features.iter() {
        let c = vocabulary.nearest(f, distance);
        let block = &mut vlad[c * dim..(c + 1) * dim];
        for ((acc, &x), &m) in block.iter_mut().zip(f).zip(vocabulary.cluster(c).mean()) {
            *acc += x - m;
        }
    }
    let norm = vlad.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in vlad.iter_mut() {
            *x /= norm;
        }
    }
    vlad
}

/// Encodes feature sets against one vocabulary
#[derive(Debug, Clone, Copy)]
pub struct Encoder<'v> {
    vocabulary: &'v Vocabulary,
    kind: EncodingKind,
    distance: Distance,
    quantize: bool,
}

impl<'v> Encoder<'v> {
    pub fn new(vocabulary: &'v Vocabulary, kind: EncodingKind, distance: Distance) -> Self {
        Self {
            vocabulary,
            kind,
            distance,
            quantize: false,
        }
    }

    /// Quantize BOVW histograms; ignored for VLAD
    pub fn with_quantize(mut self, quantize: bool) -> Self {
        self.quantize = quantize;
        self
    }

    pub fn vocabulary(&self) -> &'v Vocabulary {
        self.vocabulary
    }

    pub fn encode(&self, features: &LocalFeatureSet) -> Result<EncodedDescriptor> {
        if let Some(dim) = features.dim()
            && dim != self.vocabulary.dim()
        {
            return Err(Error::DimensionMismatch {
                expected: self.vocabulary.dim(),
                got: dim,
            });
        }
        Ok(match self.kind {
            EncodingKind::Bovw => {
                let mut hist = bovw_histogram(features, self.vocabulary, self.distance);
                if self.quantize {
                    quantize_histogram(&mut hist);
                }
                EncodedDescriptor::Histogram(hist)
            }
            EncodingKind::Vlad => {
                EncodedDescriptor::Vlad(vlad_vector(features, self.vocabulary, self.distance))
            }
        })
    }

    /// Write `descriptor` into `doc`, replacing earlier encodings
    ///
    /// With `discard_raw`, that field is dropped in the same edit, so the
    /// staged document always carries either raw features or an encoding.
    pub fn stage(
        &self,
        doc: &mut Document,
        descriptor: &EncodedDescriptor,
        fields: &EncodedFields,
        discard_raw: Option<&str>,
    ) {
        for name in fields.all() {
            doc.remove_field(name);
        }
        match descriptor {
            EncodedDescriptor::Histogram(_) => {
                doc.set(
                    fields.visual_words.as_str(),
                    FieldValue::Text(descriptor.to_text().unwrap_or_default()),
                );
                if let Some(ref hist_field) = fields.histogram {
                    doc.set(hist_field.as_str(), FieldValue::Bytes(descriptor.to_bytes()));
                }
            }
            EncodedDescriptor::Vlad(_) => {
                doc.set(
                    fields.visual_words.as_str(),
                    FieldValue::Bytes(descriptor.to_bytes()),
                );
            }
        }
        doc.set(
            fields.fingerprint.as_str(),
            FieldValue::Text(self.vocabulary.fingerprint_hex()),
        );
        if let Some(raw) = discard_raw {
            doc.remove_field(raw);
        }
    }
}
