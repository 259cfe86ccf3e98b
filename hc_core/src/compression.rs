use snafu::Snafu;

use crate::config::CompressionLevel;

#[cfg(feature = "gzip")]
mod gzip {
    use flate2::{Compression, GzBuilder, bufread::GzDecoder};
    use snafu::{Location, ResultExt, Snafu};
    use std::io::{Read, Write};

    use crate::config::CompressionLevel;

    // Request body compression
    pub fn compress_data(
        input_data: &[u8],
        level: CompressionLevel,
    ) -> Result<Vec<u8>, GzipError> {
        let flate_level = match level {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Low => Compression::fast(),
            CompressionLevel::Medium => Compression::new(6),
            CompressionLevel::High => Compression::best(),
        };

        // Use GzBuilder to create gzip with a zeroed timestamp so identical
        // inputs produce identical bytes.
        let mut encoder = GzBuilder::new().mtime(0).write(Vec::new(), flate_level);
        encoder.write_all(input_data).context(DataWritingSnafu)?;
        let compressed_data = encoder.finish().context(DataWritingSnafu)?;

        Ok(compressed_data)
    }

    // Response body decompression
    pub fn decompress_data(input_data: &[u8]) -> Result<Vec<u8>, GzipError> {
        let mut decoder = GzDecoder::new(input_data);
        let mut decompressed_data = Vec::new();
        decoder
            .read_to_end(&mut decompressed_data)
            .context(DataReadingSnafu)?;
        Ok(decompressed_data)
    }

    #[derive(Snafu, Debug)]
    pub enum GzipError {
        #[snafu(display("Failed to write data during compression"))]
        DataWriting {
            source: std::io::Error,
            #[snafu(implicit)]
            location: Location,
        },
        #[snafu(display("Failed to read data during decompression"))]
        DataReading {
            source: std::io::Error,
            #[snafu(implicit)]
            location: Location,
        },
    }
}

#[derive(Snafu, Debug)]
pub enum CompressionError {
    #[cfg(feature = "gzip")]
    #[snafu(display("gzip backend failed"), context(false))]
    Gzip { source: gzip::GzipError },
    #[snafu(display("no compression backend in this build"))]
    BackendAbsent,
}

/// Whether a compression backend was compiled in. Absence is a first-class
/// state: the engine skips compression stages and request-side opt-in fails
/// with `NotSupported`.
pub const fn available() -> bool {
    cfg!(feature = "gzip")
}

#[cfg(feature = "gzip")]
pub fn compress_data(
    input_data: &[u8],
    level: CompressionLevel,
) -> Result<Vec<u8>, CompressionError> {
    Ok(gzip::compress_data(input_data, level)?)
}

#[cfg(not(feature = "gzip"))]
pub fn compress_data(
    _input_data: &[u8],
    _level: CompressionLevel,
) -> Result<Vec<u8>, CompressionError> {
    BackendAbsentSnafu.fail()
}

#[cfg(feature = "gzip")]
pub fn decompress_data(input_data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    Ok(gzip::decompress_data(input_data)?)
}

#[cfg(not(feature = "gzip"))]
pub fn decompress_data(_input_data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    BackendAbsentSnafu.fail()
}
