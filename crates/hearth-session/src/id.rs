//! Session identifiers.
//!
//! An id is a printable token built from a 64-symbol alphabet:
//!
//! ```text
//! <routing code><random digits>[<time digits>][.<node index>]
//! ```
//!
//! The routing code is three digits (primary, backup, tertiary node of the
//! creating server), or six digits when the ring has more than 64 members or
//! the two-digit encoding is forced. Only the primary digit(s) matter after
//! generation: the [`PartitionOracle`](crate::PartitionOracle) decodes them
//! to decide which node owns the session.

use std::borrow::Borrow;
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, IdentifierConfig};
use crate::error::{Error, Result};

/// Digit alphabet. The order is part of the id format.
pub const ALPHABET: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

const NOT_A_DIGIT: u8 = 0xff;

/// Random digits drawn from one 64-bit sample.
const DIGITS_PER_SAMPLE: usize = 11;

/// Digits taken from the timestamp when the random block runs short.
const TIME_DIGITS: usize = 7;

/// Routing code used when no cluster is configured.
const STANDALONE_CODE: [u32; 3] = [0, 1, 2];

static DECODE: [u8; 128] = build_decode_table();

const fn build_decode_table() -> [u8; 128] {
    let mut table = [NOT_A_DIGIT; 128];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Map the low six bits of `code` to an alphabet symbol.
pub fn encode_digit(code: u64) -> char {
    ALPHABET[(code & 0x3f) as usize] as char
}

/// Inverse of [`encode_digit`]. `None` for characters outside the alphabet.
pub fn decode_group_digit(ch: char) -> Option<u32> {
    let code = u32::from(ch);
    if code >= 128 {
        return None;
    }
    match DECODE[code as usize] {
        NOT_A_DIGIT => None,
        digit => Some(u32::from(digit)),
    }
}

/// Opaque session identifier. Equal iff the string forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing token without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decoded value of the first character.
    pub fn group_digit(&self) -> Option<u32> {
        self.0.chars().next().and_then(decode_group_digit)
    }

    /// Decoded value of the first two characters as one base-64 number.
    pub fn wide_group(&self) -> Option<u32> {
        let mut chars = self.0.chars();
        let high = chars.next().and_then(decode_group_digit)?;
        let low = chars.next().and_then(decode_group_digit)?;
        Some(high * 64 + low)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Generates ids for one node.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdentifierConfig,
    cluster: ClusterConfig,
}

impl IdGenerator {
    pub fn new(config: IdentifierConfig, cluster: ClusterConfig) -> Self {
        Self { config, cluster }
    }

    /// Whether routing codes are written with two digits each.
    pub fn wide_codes(&self) -> bool {
        self.cluster.needs_wide_codes() || self.config.two_digit_index
    }

    /// Generate an id using the thread-local RNG.
    ///
    /// Uniqueness against the cache is the caller's job.
    pub fn generate(&self, now_ms: u64) -> Result<SessionId> {
        let mut rng = rand::rng();
        self.generate_with(|| rng.next_u64(), now_ms)
    }

    /// Generate an id drawing 64-bit samples from `random`.
    pub fn generate_with(&self, mut random: impl FnMut() -> u64, now_ms: u64) -> Result<SessionId> {
        let mut id = String::with_capacity(self.config.length + 12);
        self.push_routing_code(&mut id);

        let mut remaining = self.config.length;

        let mut sample = random();
        for _ in 0..DIGITS_PER_SAMPLE {
            if remaining == 0 {
                break;
            }
            id.push(encode_digit(sample));
            sample >>= 6;
            remaining -= 1;
        }

        let mut time = now_ms;
        for _ in 0..TIME_DIGITS {
            if remaining == 0 {
                break;
            }
            id.push(encode_digit(time));
            time >>= 6;
            remaining -= 1;
        }

        while remaining > 0 {
            let mut sample = random();
            for _ in 0..DIGITS_PER_SAMPLE {
                if remaining == 0 {
                    break;
                }
                id.push(encode_digit(sample));
                sample >>= 6;
                remaining -= 1;
            }
        }

        if self.config.append_node_index {
            id.push('.');
            id.push_str(&self.cluster.node_index.to_string());
        }

        if id.is_empty() {
            return Err(Error::EmptyIdentifier);
        }

        Ok(SessionId(id))
    }

    /// Primary, backup and tertiary node positions of this server.
    fn routing_code(&self) -> [u32; 3] {
        let count = self.cluster.node_count;
        if count == 0 {
            return STANDALONE_CODE;
        }
        let index = self.cluster.node_index;
        [index % count, (index + 1) % count, (index + 2) % count]
    }

    fn push_routing_code(&self, id: &mut String) {
        let wide = self.wide_codes();
        for code in self.routing_code() {
            let code = u64::from(code & 0xffff);
            if wide {
                id.push(encode_digit(code / 64));
            }
            id.push(encode_digit(code));
        }
    }
}
