//! Payload Compression
//!
//! LZ4 compression for payloads above a tier's size threshold. Compression is
//! offloaded to the blocking pool and bounded by a timeout; a timed-out task
//! has its ownership token cancelled and its result is discarded, so the
//! uncompressed payload is stored and compression is retried by the sweep.
//!
//! # Example
//!
//! ```
//! use tiercache::cache::compression::PayloadCompressor;
//! use tiercache::cache::Payload;
//!
//! let compressor = PayloadCompressor::default();
//! let payload = Payload::plain(vec![b'a'; 4096]);
//!
//! let compressed = compressor.maybe_compress(payload.clone(), Some(1024)).unwrap();
//! assert!(compressed.is_compressed());
//!
//! let restored = compressor.decompress(compressed).unwrap();
//! assert_eq!(restored, payload);
//! ```

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::serializer::Payload;
use crate::config::duration_str;
use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// LZ4 - fast compression
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Get typical compression ratio (1.0 = no compression)
    pub fn typical_ratio(&self) -> f64 {
        match self {
            CompressionAlgorithm::Lz4 => 0.5,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for payload compression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Master switch; when false tier thresholds are ignored
    pub enabled: bool,
    /// LZ4 high-compression level
    pub level: i32,
    /// How long `set` waits for an offloaded compression
    #[serde(with = "duration_str")]
    pub offload_timeout: Duration,
    /// Payloads at or below this size are compressed inline instead of offloaded
    pub inline_max_bytes: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 4,
            offload_timeout: Duration::from_millis(50),
            inline_max_bytes: 64 * 1024,
        }
    }
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 block compressor (size-prefixed blocks)
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: CompressionAlgorithm::Lz4.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: CompressionAlgorithm::Lz4.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::with_level(4)
    }
}

// =============================================================================
// Payload Compressor
// =============================================================================

/// Result of a bounded compression attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Payload was compressed
    Compressed(Payload),
    /// Below threshold, already compressed, or compression did not shrink it
    Unchanged(Payload),
    /// Offloaded compression missed its deadline; payload is the original
    TimedOut(Payload),
}

impl CompressionOutcome {
    pub fn into_payload(self) -> Payload {
        match self {
            CompressionOutcome::Compressed(p)
            | CompressionOutcome::Unchanged(p)
            | CompressionOutcome::TimedOut(p) => p,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, CompressionOutcome::TimedOut(_))
    }
}

/// Threshold-driven compressor for stored payloads
#[derive(Debug, Clone, Default)]
pub struct PayloadCompressor {
    config: CompressionConfig,
    lz4: Lz4Compressor,
}

impl PayloadCompressor {
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            config,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Whether a payload is eligible for compression under `threshold`
    pub fn should_compress(&self, payload: &Payload, threshold: Option<u64>) -> bool {
        match threshold {
            Some(threshold) => {
                self.config.enabled
                    && !payload.is_compressed()
                    && !payload.is_encrypted()
                    && payload.size() > threshold
            }
            None => false,
        }
    }

    /// Compress only when `size > threshold`. Idempotent: a payload flagged
    /// compressed is returned untouched.
    pub fn maybe_compress(&self, payload: Payload, threshold: Option<u64>) -> Result<Payload> {
        if !self.should_compress(&payload, threshold) {
            return Ok(payload);
        }
        let compressed = self.lz4.compress(payload.bytes())?;
        Ok(Self::keep_if_smaller(payload, compressed))
    }

    /// Compress with the work offloaded to the blocking pool, waiting at most
    /// the configured timeout.
    pub async fn compress_bounded(&self, payload: Payload, threshold: Option<u64>) -> CompressionOutcome {
        if !self.should_compress(&payload, threshold) {
            return CompressionOutcome::Unchanged(payload);
        }

        if payload.size() <= self.config.inline_max_bytes {
            return match self.lz4.compress(payload.bytes()) {
                Ok(compressed) => Self::outcome(payload, compressed),
                Err(e) => {
                    warn!("Compression failed, storing uncompressed: {}", e);
                    CompressionOutcome::Unchanged(payload)
                }
            };
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let lz4 = self.lz4;
        let input = payload.bytes().clone();

        let handle = tokio::task::spawn_blocking(move || {
            let compressed = lz4.compress(&input);
            // Ownership was revoked while we were working; drop the result.
            if task_token.is_cancelled() {
                return None;
            }
            Some(compressed)
        });

        match tokio::time::timeout(self.config.offload_timeout, handle).await {
            Ok(Ok(Some(Ok(compressed)))) => Self::outcome(payload, compressed),
            Ok(Ok(Some(Err(e)))) => {
                warn!("Compression failed, storing uncompressed: {}", e);
                CompressionOutcome::Unchanged(payload)
            }
            Ok(Ok(None)) | Ok(Err(_)) => CompressionOutcome::Unchanged(payload),
            Err(_) => {
                token.cancel();
                debug!(
                    size = payload.size(),
                    timeout = ?self.config.offload_timeout,
                    "Compression timed out, storing uncompressed"
                );
                CompressionOutcome::TimedOut(payload)
            }
        }
    }

    /// Reverse compression; plain payloads pass through
    pub fn decompress(&self, payload: Payload) -> Result<Payload> {
        if !payload.is_compressed() {
            return Ok(payload);
        }
        let plain = self.lz4.decompress(payload.bytes())?;
        Ok(Payload::from_parts(
            Bytes::from(plain),
            false,
            payload.is_encrypted(),
        ))
    }

    fn outcome(payload: Payload, compressed: Vec<u8>) -> CompressionOutcome {
        let original = payload.size();
        let result = Self::keep_if_smaller(payload, compressed);
        if result.is_compressed() {
            debug!(original, stored = result.size(), "Compressed payload");
            CompressionOutcome::Compressed(result)
        } else {
            CompressionOutcome::Unchanged(result)
        }
    }

    fn keep_if_smaller(payload: Payload, compressed: Vec<u8>) -> Payload {
        // Only use compressed if it's actually smaller
        if (compressed.len() as u64) < payload.size() {
            payload.into_compressed(Bytes::from(compressed))
        } else {
            payload
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
