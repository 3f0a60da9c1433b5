//! Binary spill format.
//!
//! Internal and non-portable across versions; a spill file is always
//! regenerable from its producer.
//!
//! ```text
//! magic    b"GSPL"
//! bands    u32 LE
//! samples  u64 LE   (per band)
//! data     bands * samples f32 LE, band-major
//! ```
//!
//! Samples are written by bit pattern so NaN payloads survive.

use crate::buffer::GridBuffer;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Magic bytes at the start of every spill file.
pub const SPILL_MAGIC: &[u8; 4] = b"GSPL";

/// Header length in bytes.
pub const HEADER_LEN: u64 = 4 + 4 + 8;

/// Errors raised while writing or reading spill files.
#[derive(Debug, Error)]
pub enum SpillError {
    /// Filesystem failure
    #[error("Spill I/O error: {0}")]
    Io(#[from] io::Error),

    /// File exists but does not hold a valid buffer
    #[error("Corrupt spill file: {0}")]
    Corrupt(String),
}

/// Exact encoded length of a buffer, or `None` if it overflows `u64`.
pub fn encoded_len(bands: usize, samples: usize) -> Option<u64> {
    (bands as u64)
        .checked_mul(samples as u64)?
        .checked_mul(4)?
        .checked_add(HEADER_LEN)
}

/// Encode a buffer into a writer.
pub fn write_buffer<W: Write>(writer: &mut W, buffer: &GridBuffer) -> io::Result<()> {
    let shape = buffer.shape();
    writer.write_all(SPILL_MAGIC)?;
    writer.write_u32::<LittleEndian>(shape.bands as u32)?;
    writer.write_u64::<LittleEndian>(shape.samples as u64)?;
    for band in buffer.bands() {
        for &value in band {
            writer.write_u32::<LittleEndian>(value.to_bits())?;
        }
    }
    Ok(())
}

/// Decode a buffer from a reader.
///
/// `total_len` is the byte length of the source; it must match the header
/// exactly, which catches truncated and over-long files.
pub fn read_buffer<R: Read>(reader: &mut R, total_len: u64) -> Result<GridBuffer, SpillError> {
    if total_len < HEADER_LEN {
        return Err(SpillError::Corrupt(format!(
            "file too short for header ({} bytes)",
            total_len
        )));
    }

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != SPILL_MAGIC {
        return Err(SpillError::Corrupt(format!("bad magic {:?}", magic)));
    }

    let bands = reader.read_u32::<LittleEndian>()? as usize;
    let samples = reader.read_u64::<LittleEndian>()?;
    let samples = usize::try_from(samples)
        .map_err(|_| SpillError::Corrupt(format!("sample count {} too large", samples)))?;

    // Zero-byte buffers are never spilled; bands without samples carry no
    // data the length check could bound.
    if samples == 0 && bands > 0 {
        return Err(SpillError::Corrupt(format!(
            "{} bands without samples",
            bands
        )));
    }

    let expected = encoded_len(bands, samples).ok_or_else(|| {
        SpillError::Corrupt(format!(
            "header size overflows ({} bands x {} samples)",
            bands, samples
        ))
    })?;
    if expected != total_len {
        return Err(SpillError::Corrupt(format!(
            "length {} does not match header ({} bands x {} samples = {} bytes)",
            total_len, bands, samples, expected
        )));
    }

    let mut data = Vec::with_capacity(bands);
    for _ in 0..bands {
        let mut band = vec![0u32; samples];
        reader.read_u32_into::<LittleEndian>(&mut band)?;
        data.push(band.into_iter().map(f32::from_bits).collect());
    }

    GridBuffer::new(data).map_err(|e| SpillError::Corrupt(e.to_string()))
}
