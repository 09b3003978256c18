use crate::core::visualization::DeadlockAnalysis;
use anyhow::{Context, Result};
use base64::alphabet::URL_SAFE;
use base64::engine::{Engine as _, general_purpose};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

fn url_engine() -> general_purpose::GeneralPurpose {
    general_purpose::GeneralPurpose::new(&URL_SAFE, general_purpose::PAD)
}

/// Converts an analysis to a compact, compressed, encoded format suitable for URL parameters
///
/// # Arguments
/// * `analysis` - The analysis to encode
///
/// # Returns
/// A Result that contains the encoded string or an error
pub fn encode_for_url(analysis: &DeadlockAnalysis) -> Result<String> {
    // 1. Convert to MessagePack; graph nodes are internally tagged, so keep field names
    let msgpack =
        rmp_serde::to_vec_named(analysis).context("Failed to convert analysis to MessagePack")?;

    // 2. Apply Gzip compression
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(&msgpack)
        .context("Failed to compress data")?;
    let compressed = encoder.finish().context("Failed to finish compression")?;

    // 3. Apply Base64URL encoding
    Ok(url_engine().encode(compressed))
}

/// Reverse [`encode_for_url`]
///
/// # Errors
/// Returns an error if any of the Base64, gzip or MessagePack layers is corrupt
pub fn decode_for_url(encoded: &str) -> Result<DeadlockAnalysis> {
    let compressed = url_engine()
        .decode(encoded)
        .context("Failed to decode Base64URL data")?;

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut msgpack = Vec::new();
    decoder
        .read_to_end(&mut msgpack)
        .context("Failed to decompress data")?;

    rmp_serde::from_slice(&msgpack).context("Failed to read analysis from MessagePack")
}
