//! Deterministic randomness for reproducible TLS handshakes.
//!
//! **INSECURE.** Everything here exists so that handshake transcripts and
//! key-log output are stable across runs when debugging or testing. A
//! configuration built with [`deterministic_provider`] must never be used to
//! make real trust decisions.

use std::sync::Arc;

use rustls::crypto::{CryptoProvider, GetRandomFailed, SecureRandom};

/// Byte source that yields an unlimited stream of `0x3a`
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedByteSource;

impl FixedByteSource {
    pub const BYTE: u8 = 0x3a;
}

impl SecureRandom for FixedByteSource {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed> {
        buf.fill(Self::BYTE);
        Ok(())
    }
}

static FIXED_SOURCE: FixedByteSource = FixedByteSource;

/// The default ring provider with its random source replaced by [`FixedByteSource`].
///
/// Handshake randoms become fixed. Ephemeral key shares are still drawn by
/// ring from the operating system.
pub fn deterministic_provider() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider {
        secure_random: &FIXED_SOURCE,
        ..rustls::crypto::ring::default_provider()
    })
}
