// A `.json` save is plain text. Anything else is in the compression format of
// the library the installation ships: zlib (raw bytes for .rpgsave, one char
// per byte for .rmmzsave) or base64 lz-string.

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::{find_first_existing, Result, SaveError};

const PLAIN_EXTENSION: &str = "json";
const UTF8_DEFLATE_EXTENSION: &str = "rmmzsave";

const DEFLATE_LIBRARY: &[&str] = &["js/libs/pako.min.js"];
const LZ_LIBRARY: &[&str] = &["www/js/libs/lz-string.js"];

// Matches the engine's own save writer; speed over ratio.
const DEFLATE_LEVEL: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum SaveFormat {
    PlainJson,
    DeflateBinary,
    DeflateUtf8,
    Base64LzString,
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveFormat::PlainJson => "plain json",
            SaveFormat::DeflateBinary => "binary deflate",
            SaveFormat::DeflateUtf8 => "utf-8 deflate",
            SaveFormat::Base64LzString => "base64 lz-string",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Framing {
    Binary,
    // One char per zlib byte (U+0000..U+00FF), written as UTF-8.
    Utf8,
}

/// Deflate codec that remembers the framing of the last file it decoded.
#[derive(Clone, Debug, Default)]
pub struct DeflateCodec {
    framing: Option<Framing>,
}

impl DeflateCodec {
    pub fn with_framing(framing: Framing) -> Self {
        Self {
            framing: Some(framing),
        }
    }

    pub fn framing(&self) -> Option<Framing> {
        self.framing
    }

    fn decode(&mut self, path: &Path) -> Result<String> {
        let mut utf8_err = None;
        if has_extension(path, UTF8_DEFLATE_EXTENSION) {
            match decode_utf8_deflate(path) {
                Ok(json) => {
                    self.framing = Some(Framing::Utf8);
                    return Ok(json);
                }
                Err(err) => {
                    log::debug!("{err}; retrying {} as binary deflate", path.display());
                    utf8_err = Some(err);
                }
            }
        }

        let json = decode_binary_deflate(path).map_err(|err| match (utf8_err, err) {
            (
                Some(first),
                SaveError::Decode {
                    path,
                    format,
                    source,
                },
            ) => SaveError::Decode {
                path,
                format,
                source: both_attempts_failed(&first, &source),
            },
            (_, err) => err,
        })?;
        self.framing = Some(Framing::Binary);
        Ok(json)
    }

    fn encode(&self, json: &str) -> Result<Vec<u8>> {
        let framing = self.framing.unwrap_or(Framing::Binary);
        let format = match framing {
            Framing::Binary => SaveFormat::DeflateBinary,
            Framing::Utf8 => SaveFormat::DeflateUtf8,
        };

        let deflated =
            deflate(json.as_bytes()).map_err(|source| SaveError::Encode { format, source })?;
        Ok(match framing {
            Framing::Binary => deflated,
            Framing::Utf8 => bytes_to_text(&deflated).into_bytes(),
        })
    }
}

#[derive(Clone, Debug)]
pub enum FormatCodec {
    PlainJson,
    Deflate(DeflateCodec),
    LzString,
}

impl FormatCodec {
    /// Picks the codec for `path` inside the installation at `root`.
    ///
    /// A `.json` extension always wins. Otherwise the compression library
    /// found under `root` decides, deflate before lz-string.
    pub fn select(path: &Path, root: &Path) -> Result<Self> {
        if has_extension(path, PLAIN_EXTENSION) {
            return Ok(FormatCodec::PlainJson);
        }
        if let Some(lib) = find_first_existing(root, DEFLATE_LIBRARY) {
            log::debug!("deflate library found at {}", lib.display());
            return Ok(FormatCodec::Deflate(DeflateCodec::default()));
        }
        if let Some(lib) = find_first_existing(root, LZ_LIBRARY) {
            log::debug!("lz-string library found at {}", lib.display());
            return Ok(FormatCodec::LzString);
        }
        Err(SaveError::FormatUndetermined(path.to_path_buf()))
    }

    pub fn format(&self) -> SaveFormat {
        match self {
            FormatCodec::PlainJson => SaveFormat::PlainJson,
            FormatCodec::Deflate(codec) => match codec.framing() {
                Some(Framing::Utf8) => SaveFormat::DeflateUtf8,
                _ => SaveFormat::DeflateBinary,
            },
            FormatCodec::LzString => SaveFormat::Base64LzString,
        }
    }

    pub fn decode(&mut self, path: &Path) -> Result<String> {
        match self {
            FormatCodec::PlainJson => read_text(path),
            FormatCodec::Deflate(codec) => codec.decode(path),
            FormatCodec::LzString => decode_lz_string(path),
        }
    }

    pub fn encode(&self, json: &str) -> Result<Vec<u8>> {
        match self {
            FormatCodec::PlainJson => Ok(json.as_bytes().to_vec()),
            FormatCodec::Deflate(codec) => codec.encode(json),
            FormatCodec::LzString => Ok(lz_str::compress_to_base64(json).into_bytes()),
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map_or(false, |e| e == ext)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| SaveError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn decode_error(path: &Path, format: SaveFormat) -> impl FnOnce(io::Error) -> SaveError {
    let path: PathBuf = path.to_path_buf();
    move |source| SaveError::Decode {
        path,
        format,
        source,
    }
}

fn decode_utf8_deflate(path: &Path) -> Result<String> {
    let on_err = || decode_error(path, SaveFormat::DeflateUtf8);
    let text = fs::read_to_string(path).map_err(on_err())?;
    let bytes = text_to_bytes(&text).map_err(on_err())?;
    inflate(&bytes).map_err(on_err())
}

fn decode_binary_deflate(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| SaveError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    inflate(&bytes).map_err(decode_error(path, SaveFormat::DeflateBinary))
}

// Both framings were tried on a .rmmzsave; keep each attempt's cause.
fn both_attempts_failed(utf8: &SaveError, binary: &io::Error) -> io::Error {
    let utf8_cause = match utf8 {
        SaveError::Decode { source, .. } => source.to_string(),
        other => other.to_string(),
    };
    io::Error::new(
        binary.kind(),
        format!(
            "{}: {utf8_cause}; {}: {binary}",
            SaveFormat::DeflateUtf8,
            SaveFormat::DeflateBinary
        ),
    )
}

fn decode_lz_string(path: &Path) -> Result<String> {
    let text = read_text(path)?;
    let payload = text.trim();
    let on_err = decode_error(path, SaveFormat::Base64LzString);

    let is_base64 = payload
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='));
    let wide = is_base64
        .then(|| lz_str::decompress_from_base64(payload))
        .flatten()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "not a base64 lz-string payload")
        });
    let json = wide.and_then(|wide| {
        String::from_utf16(&wide).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    });
    match json {
        Ok(json) if json.is_empty() && !payload.is_empty() => Err(on_err(io::Error::new(
            io::ErrorKind::InvalidData,
            "lz-string payload decompressed to nothing",
        ))),
        Ok(json) => Ok(json),
        Err(e) => Err(on_err(e)),
    }
}

fn inflate(data: &[u8]) -> io::Result<String> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}

fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(DEFLATE_LEVEL));
    encoder.write_all(data)?;
    encoder.finish()
}

fn text_to_bytes(text: &str) -> io::Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(c).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("character U+{:04X} does not fit in a byte", u32::from(c)),
                )
            })
        })
        .collect()
}

fn bytes_to_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
