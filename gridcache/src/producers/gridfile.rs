//! Banded satellite-style images stored in `GRD1` files.
//!
//! ```text
//! magic        b"GRD1"
//! bands        u32 LE
//! lines        u32 LE
//! elements     u32 LE
//! cal_scale    f32 LE   (stored counts are divided by this)
//! origin_lat   f64 LE
//! origin_lon   f64 LE
//! lat_step     f64 LE   (degrees per line)
//! lon_step     f64 LE   (degrees per element)
//! data         bands * lines * elements f32 LE, band-major, line-major
//! ```
//!
//! [`GridFileProducer`] reads a single band and applies the calibration.
//! [`ImageBand`] is the owner; its [`Navigation`] block is kept as aux
//! metadata so every view of the band shares one copy.

use crate::buffer::{BufferShape, GridBuffer, ShapeError};
use crate::cache::{CacheError, GridCache};
use crate::field::GridLayout;
use crate::handle::CacheHandle;
use crate::owner::GridBufferOwner;
use crate::producer::{ProduceError, Producer};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Magic bytes at the start of every grid file.
pub const GRID_FILE_MAGIC: &[u8; 4] = b"GRD1";

/// Header length in bytes.
const HEADER_LEN: u64 = 4 + 4 * 3 + 4 + 8 * 4;

/// Linear navigation: latitude/longitude of line 0, element 0 plus the
/// step per line and per element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub lat_step: f64,
    pub lon_step: f64,
}

impl Navigation {
    pub fn lat_lon(&self, line: usize, element: usize) -> (f64, f64) {
        (
            self.origin_lat + line as f64 * self.lat_step,
            self.origin_lon + element as f64 * self.lon_step,
        )
    }
}

/// Parsed `GRD1` header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFileHeader {
    pub bands: usize,
    pub lines: usize,
    pub elements: usize,
    pub calibration_scale: f32,
    pub navigation: Navigation,
}

impl GridFileHeader {
    /// Samples per band.
    pub fn band_len(&self) -> usize {
        self.lines * self.elements
    }

    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.lines, self.elements)
    }

    /// Exact length of a file with this header, or `None` if the
    /// dimensions overflow.
    pub fn file_len(&self) -> Option<u64> {
        (self.bands as u64)
            .checked_mul(self.lines as u64)?
            .checked_mul(self.elements as u64)?
            .checked_mul(4)?
            .checked_add(HEADER_LEN)
    }

    fn dims(&self) -> Vec<usize> {
        vec![self.bands, self.lines, self.elements]
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ProduceError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != GRID_FILE_MAGIC {
            return Err(ProduceError::Decode(format!(
                "not a grid file (magic {:?})",
                magic
            )));
        }

        let bands = reader.read_u32::<LittleEndian>()? as usize;
        let lines = reader.read_u32::<LittleEndian>()? as usize;
        let elements = reader.read_u32::<LittleEndian>()? as usize;
        let calibration_scale = reader.read_f32::<LittleEndian>()?;
        let navigation = Navigation {
            origin_lat: reader.read_f64::<LittleEndian>()?,
            origin_lon: reader.read_f64::<LittleEndian>()?,
            lat_step: reader.read_f64::<LittleEndian>()?,
            lon_step: reader.read_f64::<LittleEndian>()?,
        };

        Ok(Self {
            bands,
            lines,
            elements,
            calibration_scale,
            navigation,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(GRID_FILE_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.bands as u32)?;
        writer.write_u32::<LittleEndian>(self.lines as u32)?;
        writer.write_u32::<LittleEndian>(self.elements as u32)?;
        writer.write_f32::<LittleEndian>(self.calibration_scale)?;
        writer.write_f64::<LittleEndian>(self.navigation.origin_lat)?;
        writer.write_f64::<LittleEndian>(self.navigation.origin_lon)?;
        writer.write_f64::<LittleEndian>(self.navigation.lat_step)?;
        writer.write_f64::<LittleEndian>(self.navigation.lon_step)?;
        Ok(())
    }
}

/// Read only the header of a grid file.
pub fn read_header(path: &Path) -> Result<GridFileHeader, ProduceError> {
    let mut reader = BufReader::new(File::open(path)?);
    GridFileHeader::read_from(&mut reader)
}

/// Write a grid file. `bands` holds raw stored counts, one `Vec` per band
/// of `lines * elements` samples.
pub fn write_grid_file(
    path: &Path,
    header: &GridFileHeader,
    bands: &[Vec<f32>],
) -> io::Result<()> {
    if bands.len() != header.bands || bands.iter().any(|b| b.len() != header.band_len()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "band data does not match header ({} x {} x {})",
                header.bands, header.lines, header.elements
            ),
        ));
    }

    let mut writer = BufWriter::new(File::create(path)?);
    header.write_to(&mut writer)?;
    for band in bands {
        for &value in band {
            writer.write_f32::<LittleEndian>(value)?;
        }
    }
    writer.flush()
}

/// Reads one calibrated band of a grid file.
#[derive(Debug, Clone)]
pub struct GridFileProducer {
    path: PathBuf,
    band: usize,
    lines: usize,
    elements: usize,
}

impl GridFileProducer {
    /// Open a band of a grid file. Only the header is read here.
    pub fn open(path: impl Into<PathBuf>, band: usize) -> Result<Self, ProduceError> {
        let path = path.into();
        let header = read_header(&path)?;
        check_band(&header, band)?;
        Ok(Self {
            path,
            band,
            lines: header.lines,
            elements: header.elements,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn band(&self) -> usize {
        self.band
    }

    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.lines, self.elements)
    }

    fn out_of_bounds(&self, header: &GridFileHeader, index: usize, limit: usize) -> ShapeError {
        ShapeError::OutOfBounds {
            context: format!("band {} of {}", self.band, self.path.display()),
            index,
            limit,
            source_dims: header.dims(),
            target_dims: vec![1, self.lines, self.elements],
        }
    }
}

fn check_band(header: &GridFileHeader, band: usize) -> Result<(), ShapeError> {
    if band >= header.bands {
        return Err(ShapeError::OutOfBounds {
            context: "band selection".to_string(),
            index: band,
            limit: header.bands,
            source_dims: header.dims(),
            target_dims: vec![1, header.lines, header.elements],
        });
    }
    Ok(())
}

impl Producer for GridFileProducer {
    fn produce(&self) -> Result<GridBuffer, ProduceError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let header = GridFileHeader::read_from(&mut reader)?;
        check_band(&header, self.band)?;

        if header.calibration_scale == 0.0 || !header.calibration_scale.is_finite() {
            return Err(ProduceError::Decode(format!(
                "invalid calibration scale {}",
                header.calibration_scale
            )));
        }
        let cal_scale = 1.0 / header.calibration_scale;

        let expected_len = header.file_len().ok_or_else(|| {
            ProduceError::Decode(format!(
                "header dimensions {:?} overflow the addressable size",
                header.dims()
            ))
        })?;
        if file_len != expected_len {
            return Err(ProduceError::Decode(format!(
                "file is {} bytes, header {:?} needs {}",
                file_len,
                header.dims(),
                expected_len
            )));
        }

        // Geometry is checked before any sample buffer is allocated
        if header.lines > self.lines {
            return Err(self.out_of_bounds(&header, self.lines, self.lines).into());
        }
        if header.elements > self.elements {
            let limit = self.lines * self.elements;
            return Err(self.out_of_bounds(&header, self.elements, limit).into());
        }
        if header.band_len() != self.lines * self.elements {
            return Err(ShapeError::Mismatch {
                expected: self.shape(),
                actual: BufferShape::new(1, header.band_len()),
            }
            .into());
        }

        // Skip the bands in front of ours
        let skip = (header.band_len() as u64) * (self.band as u64) * 4;
        let skipped = io::copy(&mut (&mut reader).take(skip), &mut io::sink())?;
        if skipped != skip {
            return Err(ProduceError::Decode(format!(
                "truncated before band {} ({} of {} bytes after the {}-byte header)",
                self.band, skipped, skip, HEADER_LEN
            )));
        }

        let mut samples = vec![0.0f32; header.band_len()];
        reader
            .read_f32_into::<LittleEndian>(&mut samples)
            .map_err(|e| ProduceError::Decode(format!("truncated in band {}: {}", self.band, e)))?;
        for value in samples.iter_mut() {
            *value *= cal_scale;
        }

        debug!(
            path = %self.path.display(),
            band = self.band,
            lines = header.lines,
            elements = header.elements,
            "Read grid file band"
        );

        Ok(GridBuffer::new(vec![samples])?)
    }

    fn shape(&self) -> BufferShape {
        BufferShape::new(1, self.lines * self.elements)
    }

    fn label(&self) -> String {
        format!("{}#band{}", self.path.display(), self.band)
    }
}

/// One band of a grid file, read lazily through the cache.
#[derive(Debug)]
pub struct ImageBand {
    path: PathBuf,
    band: usize,
    layout: GridLayout,
    handle: CacheHandle,
}

impl ImageBand {
    pub fn open(
        cache: Arc<GridCache>,
        path: impl Into<PathBuf>,
        band: usize,
    ) -> Result<Self, CacheError> {
        let path = path.into();
        let producer = GridFileProducer::open(&path, band).map_err(|source| CacheError::Produce {
            label: format!("{}#band{}", path.display(), band),
            source,
        })?;
        let layout = producer.layout();
        Ok(Self {
            path,
            band,
            layout,
            handle: CacheHandle::lazy(cache, Arc::new(producer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn band(&self) -> usize {
        self.band
    }

    /// Lines by elements.
    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Navigation block of the source file, read once per root.
    pub fn navigation(&self) -> Result<Arc<Navigation>, CacheError> {
        let path = self.path.clone();
        self.handle
            .metadata(move || read_header(&path).map(|header| header.navigation))
    }

    /// Latitude/longitude of a pixel, `None` outside the image.
    pub fn line_element_to_lat_lon(
        &self,
        line: usize,
        element: usize,
    ) -> Result<Option<(f64, f64)>, CacheError> {
        if self.layout.index(line, element).is_none() {
            return Ok(None);
        }
        Ok(Some(self.navigation()?.lat_lon(line, element)))
    }
}

impl GridBufferOwner for ImageBand {
    fn cache_handle(&self) -> &CacheHandle {
        &self.handle
    }

    fn with_view(&self, handle: CacheHandle) -> Self {
        Self {
            path: self.path.clone(),
            band: self.band,
            layout: self.layout,
            handle,
        }
    }
}
