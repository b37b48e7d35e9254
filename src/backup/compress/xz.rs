use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::result_error::result::Result;
use bon::Builder;
use liblzma::stream::{Check, MtStreamBuilder};
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use validator::Validate;

/// Preset used when a config leaves `level` out.
const DUMP_PRESET: u32 = 3;
const MAX_ENCODER_THREADS: usize = 32;

/// `.xz` artifacts. Smaller than gzip for large SQL dumps at a higher CPU cost.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, Builder)]
#[serde(deny_unknown_fields)]
pub struct XzConfig {
    /// LZMA preset, 0 (fast) to 9 (small)
    #[validate(range(min = 0, max = 9))]
    level: Option<u32>,

    /// Encoder threads, half the available cores when unset
    #[validate(range(min = 1))]
    thread: Option<u32>,
}

impl XzConfig {
    fn encoder_threads(&self) -> u32 {
        match self.thread {
            Some(thread) => thread,
            None => std::thread::available_parallelism()
                .map(|cores| (cores.get() / 2).clamp(1, MAX_ENCODER_THREADS) as u32)
                .unwrap_or(1),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for XzConfig {
    /// One thread uses the plain encoder, more use the block-parallel one.
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let preset = self.level.unwrap_or(DUMP_PRESET);
        let threads = self.encoder_threads();
        tracing::debug!("xz encoder: preset={}, threads={}", preset, threads);

        match threads {
            1 => Ok(XzEncoder::new(writer, preset).into()),
            _ => {
                let stream = MtStreamBuilder::new()
                    .preset(preset)
                    .check(Check::Crc64)
                    .threads(threads)
                    .encoder()?;
                Ok(XzEncoder::new_stream(writer, stream).into())
            }
        }
    }
}
