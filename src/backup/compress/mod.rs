pub mod gzip;
pub mod xz;

use crate::backup::cancel::{copy_with_cancel, CancelToken};
use crate::backup::file_ext::{strip_ext, with_appended_ext, FileExtProvider};
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use derive_more::From;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use io_enum::{Read, Write};
use liblzma::read::XzDecoder;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::io::{BufReader, BufWriter, IntoInnerError, Read, Write};
use std::path::{Path, PathBuf};
use std::result;
use std::sync::{Arc, OnceLock};
use validator::{Validate, ValidationErrors};

#[derive(Write, From)]
pub enum Compressor<W: Write> {
    Gzip(GzEncoder<W>),
    XzEncoder(XzEncoder<W>),
}

#[derive(Read, From)]
pub enum Decompressor<R: Read> {
    Gzip(MultiGzDecoder<R>),
    XzDecoder(XzDecoder<R>),
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "compressor_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CompressorConfig {
    None,
    Gzip(gzip::GzipConfig),
    Xz(xz::XzConfig),
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self::Gzip(gzip::GzipConfig::default())
    }
}

impl Validate for CompressorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            CompressorConfig::None => Ok(()),
            CompressorConfig::Gzip(gz) => gz.validate(),
            CompressorConfig::Xz(xz) => xz.validate(),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>>;
}

pub trait DecompressorBuilder<R: Read> {
    fn build_decompressor(&self, reader: R) -> Result<Decompressor<R>>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Gzip(w) => w.finish(),
            Compressor::XzEncoder(w) => w.finish(),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for CompressorConfig {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        match self {
            CompressorConfig::None => Err(Error::config("no compressor configured")),
            CompressorConfig::Gzip(gz) => gz.build_compressor(writer),
            CompressorConfig::Xz(xz) => xz.build_compressor(writer),
        }
    }
}

impl<R: Read> DecompressorBuilder<R> for CompressorConfig {
    fn build_decompressor(&self, reader: R) -> Result<Decompressor<R>> {
        match self {
            CompressorConfig::None => Err(Error::config("no compressor configured")),
            CompressorConfig::Gzip(_) => Ok(MultiGzDecoder::new(reader).into()),
            CompressorConfig::Xz(_) => Ok(XzDecoder::new_multi_decoder(reader).into()),
        }
    }
}

static GZ_FILE_EXT: OnceLock<Arc<str>> = OnceLock::new();
static XZ_FILE_EXT: OnceLock<Arc<str>> = OnceLock::new();

impl FileExtProvider for CompressorConfig {
    fn file_ext(&self) -> Option<Arc<str>> {
        match self {
            CompressorConfig::None => None,
            CompressorConfig::Gzip(_) => Some(GZ_FILE_EXT.get_or_init(|| "gz".into()).clone()),
            CompressorConfig::Xz(_) => Some(XZ_FILE_EXT.get_or_init(|| "xz".into()).clone()),
        }
    }
}

impl CompressorConfig {
    pub fn codec_name(&self) -> Arc<str> {
        match self {
            CompressorConfig::None => "none".into(),
            CompressorConfig::Gzip(_) => "gzip".into(),
            CompressorConfig::Xz(_) => "xz".into(),
        }
    }

    /// Picks the codec matching the suffix of `path`, if it has a known one.
    pub fn for_path<P: AsRef<Path>>(path: P) -> Option<CompressorConfig> {
        [
            CompressorConfig::Gzip(Default::default()),
            CompressorConfig::Xz(Default::default()),
        ]
        .into_iter()
        .find(|c| {
            c.file_ext()
                .is_some_and(|ext| strip_ext(path.as_ref(), &ext).is_some())
        })
    }

    pub fn compressed_path<P: AsRef<Path>>(&self, src: P) -> Option<PathBuf> {
        self.file_ext().map(|ext| with_appended_ext(src, &ext))
    }

    pub fn decompressed_path<P: AsRef<Path>>(&self, src: P) -> Result<PathBuf> {
        let src = src.as_ref();
        let ext = self
            .file_ext()
            .ok_or_else(|| Error::config("no compressor configured"))?;
        strip_ext(src, &ext).ok_or_else(|| Error::suffix_mismatch(src, ext))
            .map_err(|e| Error::compression(self.codec_name(), e))
    }

    /// Compresses `src` next to itself, returning the suffixed path. The
    /// path is [`compressed_path`](Self::compressed_path), so a caller can
    /// track it before anything is written.
    pub fn compress<P: AsRef<Path>>(&self, src: P, cancel: &CancelToken) -> Result<PathBuf> {
        let dst = self
            .compressed_path(src.as_ref())
            .ok_or_else(|| Error::compression(self.codec_name(), Error::config("no compressor configured")))?;
        self.compress_to(src, dst, cancel)
    }

    /// Single streaming pass from `src` into a new file at `dst`.
    fn compress_to<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        src: P1,
        dst: P2,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        tracing::debug!("Compressing {:?} -> {:?} with {}", src, dst, self.codec_name());
        write_new_file(dst, |out| {
            let mut reader = File::open(src)
                .map(BufReader::new)
                .map_err(Error::from)
                .add_msg(format!("Failed to open {:?}", src))?;
            let mut writer = self.build_compressor(BufWriter::new(out))?;
            copy_with_cancel(&mut reader, &mut writer, cancel)?;
            writer
                .finish()?
                .into_inner()
                .map_err(IntoInnerError::into_error)?
                .sync_all()?;
            Ok(())
        })
        .map_err(|e| Error::compression(self.codec_name(), e))
    }

    /// Reverses [`compress`](Self::compress); fails when `src` lacks this codec's suffix.
    pub fn decompress<P: AsRef<Path>>(&self, src: P, cancel: &CancelToken) -> Result<PathBuf> {
        let dst = self.decompressed_path(src.as_ref())?;
        self.decompress_to(src, dst, cancel)
    }

    fn decompress_to<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        src: P1,
        dst: P2,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        self.decompressed_path(src)?;
        tracing::debug!("Decompressing {:?} -> {:?} with {}", src, dst, self.codec_name());
        write_new_file(dst, |out| {
            let reader = File::open(src)
                .map(BufReader::new)
                .map_err(Error::from)
                .add_msg(format!("Failed to open {:?}", src))?;
            let mut reader = self.build_decompressor(reader)?;
            let mut writer = BufWriter::new(out);
            copy_with_cancel(&mut reader, &mut writer, cancel)?;
            writer
                .into_inner()
                .map_err(IntoInnerError::into_error)?
                .sync_all()?;
            Ok(())
        })
        .map_err(|e| Error::compression(self.codec_name(), e))
    }
}

/// Creates `dst` (never clobbering an existing file) and removes it again if
/// `write` fails part way.
fn write_new_file<F: FnOnce(File) -> Result<()>>(dst: &Path, write: F) -> Result<PathBuf> {
    let file = File::create_new(dst)
        .map_err(Error::from)
        .add_msg(format!("Failed to create {:?}", dst))?;
    match write(file) {
        Ok(()) => Ok(dst.to_path_buf()),
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(dst) {
                tracing::warn!("Failed to remove partial output {:?}: {}", dst, rm);
                return Err(e.chain(rm.into()));
            }
            Err(e)
        }
    }
}
