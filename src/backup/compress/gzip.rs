use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::result_error::result::Result;
use bon::Builder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use validator::Validate;

static DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Configuration for gzip (DEFLATE) compression
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, Builder)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    /// Compression level (0-9), 6 when unset
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,
}

impl<W: Write> CompressorBuilder<W> for GzipConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let level = self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        tracing::debug!("Creating gzip compressor with level={}", level);
        Ok(GzEncoder::new(writer, Compression::new(level)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_gzip_config_validation() {
        assert!(GzipConfig::default().validate().is_ok());
        assert!(GzipConfig::builder().level(9).build().validate().is_ok());
        assert!(GzipConfig::builder().level(10).build().validate().is_err());
    }

    #[test]
    fn test_build_compressor() {
        let compressor = GzipConfig::builder()
            .level(1)
            .build()
            .build_compressor(Cursor::new(Vec::new()))
            .unwrap();
        match compressor {
            Compressor::Gzip(_) => (),
            _ => panic!("Expected gzip encoder"),
        }
    }

    #[test]
    fn test_gzip_config_rejects_unknown_fields() {
        assert!(serde_json::from_str::<GzipConfig>(r#"{"level": 3, "thread": 2}"#).is_err());
    }
}
