//! Binary hand-off format for generated angle sequences.
//!
//! Layout, little-endian: `batch: u32`, `len: u32`, then `batch * len`
//! `f32` angles in batch-major order.

use bytemuck::cast_slice;
use memmap2::MmapOptions;
use ndarray::Array2;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const HEADER_LEN: usize = 8;

/// A batch of decoded angle sequences.
#[derive(Clone, Debug, PartialEq)]
pub struct AngleFile {
    pub angles: Array2<f32>,
}

impl AngleFile {
    pub fn new(angles: Array2<f32>) -> Self {
        Self { angles }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let (batch, len) = self.angles.dim();
        let batch = u32::try_from(batch).map_err(|_| invalid("batch does not fit in u32"))?;
        let len = u32::try_from(len).map_err(|_| invalid("sequence does not fit in u32"))?;

        let mut f = BufWriter::new(File::create(path)?);
        f.write_all(&batch.to_le_bytes())?;
        f.write_all(&len.to_le_bytes())?;
        let data: Vec<u32> = self.angles.iter().map(|a| a.to_bits().to_le()).collect();
        f.write_all(cast_slice(&data))?;
        f.flush()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_bytes(&mmap[..])
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid("angle file is shorter than its header"));
        }
        let batch = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let body = &bytes[HEADER_LEN..];
        let expected = batch
            .checked_mul(len)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| invalid("angle file header is too large"))?;
        if body.len() != expected {
            return Err(invalid("angle file length does not match its header"));
        }
        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let angles = Array2::from_shape_vec((batch, len), data).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self { angles })
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
