//! Producers for common grid sources, each paired with an owner type.
//!
//! - [`gridfile`]: banded images stored in `GRD1` files
//! - [`subgrid`]: strided windows cut from another owner's buffer

pub mod gridfile;
pub mod subgrid;

pub use gridfile::{
    read_header, write_grid_file, GridFileHeader, GridFileProducer, ImageBand, Navigation,
    GRID_FILE_MAGIC,
};
pub use subgrid::{GridSlice, SubGridProducer, Window};
