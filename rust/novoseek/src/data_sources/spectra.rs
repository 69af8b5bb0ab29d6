use crate::errors::SpectrumReadingError;
use crate::models::Spectrum;
use std::io::{
    BufRead,
    BufReader,
    Read,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::info;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectraFormat {
    NdJson,
    NdJsonZstd,
    MessagePack,
    MessagePackZstd,
}

impl SpectraFormat {
    pub fn detect_from_path(path: &Path) -> Result<Self, SpectrumReadingError> {
        let path_str = path.to_string_lossy().to_lowercase();

        if path_str.ends_with(".msgpack.zst") {
            Ok(SpectraFormat::MessagePackZstd)
        } else if path_str.ends_with(".msgpack") {
            Ok(SpectraFormat::MessagePack)
        } else if path_str.ends_with(".ndjson.zst") || path_str.ends_with(".jsonl.zst") {
            Ok(SpectraFormat::NdJsonZstd)
        } else if path_str.ends_with(".ndjson") || path_str.ends_with(".jsonl") {
            Ok(SpectraFormat::NdJson)
        } else {
            Self::detect_from_content(path)
        }
    }

    /// Sniffs the first bytes: zstd frames are assumed to hold NDJSON when
    /// the decompressed stream starts with `{`, MessagePack otherwise.
    fn detect_from_content(path: &Path) -> Result<Self, SpectrumReadingError> {
        let open = || {
            std::fs::File::open(path).map_err(|e| SpectrumReadingError::FileReadingError {
                source: e,
                context: "Error opening file for format detection",
                path: PathBuf::from(path),
            })
        };
        let mut buffer = [0u8; 4];
        let bytes_read = read_prefix(open()?, &mut buffer);
        if bytes_read < 4 {
            return Ok(SpectraFormat::NdJson);
        }
        if buffer == ZSTD_MAGIC {
            let mut inner = [0u8; 1];
            let decoded = match zstd::Decoder::new(open()?) {
                Ok(decoder) => read_prefix(decoder, &mut inner),
                Err(_) => 0,
            };
            if decoded == 1 && inner[0] == b'{' {
                Ok(SpectraFormat::NdJsonZstd)
            } else {
                Ok(SpectraFormat::MessagePackZstd)
            }
        } else if buffer[0] == b'{' {
            Ok(SpectraFormat::NdJson)
        } else {
            Ok(SpectraFormat::MessagePack)
        }
    }
}

fn read_prefix<R: Read>(reader: R, buffer: &mut [u8]) -> usize {
    let mut reader = BufReader::new(reader);
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    filled
}

fn zstd_error(e: std::io::Error) -> SpectrumReadingError {
    SpectrumReadingError::ParsingError {
        source: serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        context: "Error creating ZSTD decoder",
    }
}

/// Streaming reader over a spectra file, one spectrum at a time.
pub struct SpectraReader<'a> {
    inner: Box<dyn Iterator<Item = Result<Spectrum, SpectrumReadingError>> + Send + 'a>,
}

impl<'a> SpectraReader<'a> {
    pub fn new<R: Read + Send + 'a>(
        reader: R,
        format: SpectraFormat,
    ) -> Result<Self, SpectrumReadingError> {
        let inner: Box<dyn Iterator<Item = Result<Spectrum, SpectrumReadingError>> + Send + 'a> =
            match format {
                SpectraFormat::NdJson => Box::new(NdJsonReader::new(BufReader::new(reader))),
                SpectraFormat::NdJsonZstd => {
                    let decoder = zstd::Decoder::new(reader).map_err(zstd_error)?;
                    Box::new(NdJsonReader::new(BufReader::new(decoder)))
                }
                SpectraFormat::MessagePack => Box::new(MessagePackReader::new(reader)),
                SpectraFormat::MessagePackZstd => {
                    let decoder = zstd::Decoder::new(reader).map_err(zstd_error)?;
                    Box::new(MessagePackReader::new(decoder))
                }
            };

        Ok(SpectraReader { inner })
    }

    pub fn from_path(path: &Path) -> Result<SpectraReader<'static>, SpectrumReadingError> {
        let format = SpectraFormat::detect_from_path(path)?;
        info!("Reading spectra from {} as {:?}", path.display(), format);
        let file =
            std::fs::File::open(path).map_err(|e| SpectrumReadingError::FileReadingError {
                source: e,
                context: "Error opening spectra file",
                path: PathBuf::from(path),
            })?;
        SpectraReader::new(file, format)
    }
}

impl Iterator for SpectraReader<'_> {
    type Item = Result<Spectrum, SpectrumReadingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Reads the whole file into memory.
pub fn read_spectra(path: &Path) -> Result<Vec<Spectrum>, SpectrumReadingError> {
    SpectraReader::from_path(path)?.collect()
}

struct NdJsonReader<R: BufRead> {
    reader: R,
    line: String,
}

impl<R: BufRead> NdJsonReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for NdJsonReader<R> {
    type Item = Result<Spectrum, SpectrumReadingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) if self.line.trim().is_empty() => continue,
                Ok(_) => {
                    return Some(serde_json::from_str(&self.line).map_err(|e| {
                        SpectrumReadingError::ParsingError {
                            source: e,
                            context: "Error parsing NDJSON line",
                        }
                    }));
                }
                Err(e) => {
                    return Some(Err(SpectrumReadingError::FileReadingError {
                        source: e,
                        context: "Error reading line",
                        path: PathBuf::new(),
                    }));
                }
            }
        }
    }
}

struct MessagePackReader<R: Read> {
    deserializer: rmp_serde::Deserializer<rmp_serde::decode::ReadReader<R>>,
}

impl<R: Read> MessagePackReader<R> {
    fn new(reader: R) -> Self {
        Self {
            deserializer: rmp_serde::Deserializer::new(reader),
        }
    }
}

impl<R: Read> Iterator for MessagePackReader<R> {
    type Item = Result<Spectrum, SpectrumReadingError>;

    fn next(&mut self) -> Option<Self::Item> {
        use serde::Deserialize;

        match Spectrum::deserialize(&mut self.deserializer) {
            Ok(elem) => Some(Ok(elem)),
            Err(rmp_serde::decode::Error::InvalidMarkerRead(ref io_err))
                if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                None
            }
            Err(rmp_serde::decode::Error::InvalidDataRead(ref io_err))
                if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                None
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::io::Write;

    fn spectra() -> Vec<Spectrum> {
        vec![
            Spectrum::sample(),
            Spectrum::new("scan=2", 612.3, 3, vec![200.0, 300.5], vec![10.0, 2.0])
                .with_sequence("PEPTIDEK"),
        ]
    }

    fn write_ndjson<W: Write>(mut w: W, spectra: &[Spectrum]) {
        for s in spectra {
            serde_json::to_writer(&mut w, s).unwrap();
            w.write_all(b"\n\n").unwrap();
        }
    }

    #[test]
    fn test_ndjson_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.ndjson");
        write_ndjson(std::fs::File::create(&path).unwrap(), &spectra());
        let read = read_spectra(&path).unwrap();
        assert_eq!(read, spectra());
    }

    #[test]
    fn test_zstd_ndjson_roundtrip_and_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.ndjson.zst");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = zstd::Encoder::new(file, 3).unwrap();
        write_ndjson(&mut encoder, &spectra());
        encoder.finish().unwrap();
        assert_eq!(read_spectra(&path).unwrap(), spectra());

        let unnamed = dir.path().join("spectra.bin");
        std::fs::copy(&path, &unnamed).unwrap();
        assert_eq!(
            SpectraFormat::detect_from_path(&unnamed).unwrap(),
            SpectraFormat::NdJsonZstd
        );
    }

    #[test]
    fn test_msgpack_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.msgpack");
        let mut file = std::fs::File::create(&path).unwrap();
        for s in spectra() {
            let mut ser = rmp_serde::Serializer::new(&mut file).with_struct_map();
            s.serialize(&mut ser).unwrap();
        }
        drop(file);
        assert_eq!(read_spectra(&path).unwrap(), spectra());
    }

    #[test]
    fn test_bad_line_is_an_error() {
        let input = b"{\"spectrum_id\": \"a\"}\n".as_slice();
        let mut reader = SpectraReader::new(input, SpectraFormat::NdJson).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(SpectrumReadingError::ParsingError { .. }))
        ));
        assert!(reader.next().is_none());
    }
}
