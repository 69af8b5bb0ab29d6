pub mod spectra;

pub use spectra::{
    SpectraFormat,
    SpectraReader,
    read_spectra,
};
