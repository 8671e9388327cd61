//! Payload compression: JSON text -> gzip -> base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
  #[error("Compression error: {0}")]
  Compression(#[from] std::io::Error),

  #[error("Base64 decode error: {0}")]
  Base64(#[from] base64::DecodeError),

  #[error("Decompressed payload is not UTF-8: {0}")]
  Utf8(#[from] std::string::FromUtf8Error),
}

/// Compress serialized JSON text into an opaque string.
pub fn compress(json: &str) -> Result<String, CodecError> {
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(json.as_bytes())?;
  let compressed = encoder.finish()?;

  Ok(STANDARD.encode(compressed))
}

/// Reverse of [`compress`].
pub fn decompress(encoded: &str) -> Result<String, CodecError> {
  let compressed = STANDARD.decode(encoded)?;

  let mut decoder = GzDecoder::new(&compressed[..]);
  let mut json = Vec::new();
  decoder.read_to_end(&mut json)?;

  Ok(String::from_utf8(json)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_compress_decompress() {
    let json = r#"{"sku":"A-100","qty":12,"tags":["fast","bulk"]}"#;
    let encoded = compress(json).unwrap();
    assert_ne!(encoded, json);
    assert_eq!(decompress(&encoded).unwrap(), json);
  }

  #[test]
  fn test_decompress_rejects_garbage() {
    assert!(matches!(
      decompress("not base64 at all!"),
      Err(CodecError::Base64(_))
    ));

    let not_gzip = STANDARD.encode(b"plain bytes");
    assert!(matches!(
      decompress(&not_gzip),
      Err(CodecError::Compression(_))
    ));
  }
}
