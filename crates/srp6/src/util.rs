//! The raw protocol calculations. Exposed so that the regression
//! vectors can pin each step individually; the [`crate::Server`] and
//! [`crate::Client`] roles are the intended entry points.

use num_bigint::BigUint;
use sha1::{Digest, Sha1};

use crate::{sha1_digest_20, Generator, SessionKey};

pub(crate) const SHA1_LEN: usize = 20;

/// Encoding rules applied to big integers before hashing.
///
/// The game variant feeds integers to SHA-1 in little-endian order and
/// decodes digests the same way; RFC5054 keeps network order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Game,
    Rfc5054,
}

/// Little-endian bytes, zero-padded up to `len`.
pub fn encode_le_padded(val: &BigUint, len: usize) -> Vec<u8> {
    let mut bytes = val.to_bytes_le();
    bytes.resize(len, 0);
    bytes
}

/// Big-endian bytes, zero-padded up to `len`.
pub fn encode_be_padded(val: &BigUint, len: usize) -> Vec<u8> {
    let bytes = val.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// k = H(N | PAD(g)), big-endian in both modes.
pub fn compute_k(g: &BigUint, n: &BigUint) -> BigUint {
    let n_bytes = n.to_bytes_be();
    let mut hasher = Sha1::new();
    let g_padded = encode_be_padded(g, n_bytes.len());
    hasher.update(&n_bytes);
    hasher.update(&g_padded);
    BigUint::from_bytes_be(&hasher.finalize())
}

/// x = H(s | H(I ":" P)).
///
/// The salt is fed exactly as provided: callers pass it in wire order,
/// which for the game variant is the little-endian encoding.
pub fn compute_x(identifier: &str, password: &str, salt: &[u8], mode: Mode) -> BigUint {
    let inner = {
        let mut hasher = Sha1::new();
        hasher.update(identifier.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        hasher.finalize()
    };

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(&inner);
    let digest = hasher.finalize();

    match mode {
        Mode::Game => BigUint::from_bytes_le(&digest),
        Mode::Rfc5054 => BigUint::from_bytes_be(&digest),
    }
}

/// v = g^x mod N.
pub fn generate_verifier(
    identifier: &str,
    password: &str,
    gen: &Generator,
    salt: &[u8],
    mode: Mode,
) -> BigUint {
    let x = compute_x(identifier, password, salt, mode);
    gen.generator().modpow(&x, gen.prime())
}

/// u = H(PAD(A) | PAD(B)), padded to the width of the prime.
pub fn scrambler(a: &BigUint, b: &BigUint, padding: usize, mode: Mode) -> BigUint {
    let mut hasher = Sha1::new();
    match mode {
        Mode::Rfc5054 => {
            hasher.update(encode_be_padded(a, padding));
            hasher.update(encode_be_padded(b, padding));
            BigUint::from_bytes_be(&hasher.finalize())
        }
        Mode::Game => {
            hasher.update(encode_le_padded(a, padding));
            hasher.update(encode_le_padded(b, padding));
            BigUint::from_bytes_le(&hasher.finalize())
        }
    }
}

/// The RFC2945 interleaved hash: strip leading zero bytes, drop one
/// more if the remainder is odd, SHA-1 the even- and odd-indexed
/// halves and interleave the two digests into 40 bytes.
pub fn interleaved_hash(key: &[u8]) -> Vec<u8> {
    let start = key.iter().position(|&b| b != 0).unwrap_or(key.len());
    let start = if (key.len() - start) % 2 == 0 {
        start
    } else {
        start + 1
    };
    let key = &key[start.min(key.len())..];

    let even: Vec<u8> = key.iter().step_by(2).copied().collect();
    let odd: Vec<u8> = key.iter().skip(1).step_by(2).copied().collect();
    let g = Sha1::digest(&even);
    let h = Sha1::digest(&odd);

    let mut out = Vec::with_capacity(SHA1_LEN * 2);
    for i in 0..SHA1_LEN {
        out.push(g[i]);
        out.push(h[i]);
    }
    out
}

/// Derive the session key from the premaster secret. Game mode
/// interleaves the little-endian premaster bytes; RFC5054 keeps the
/// raw premaster.
pub fn derive_session_key(premaster: &BigUint, mode: Mode) -> SessionKey {
    match mode {
        Mode::Game => SessionKey(interleaved_hash(&premaster.to_bytes_le())),
        Mode::Rfc5054 => SessionKey(premaster.to_bytes_be()),
    }
}

/// M1 = H(H(N) xor H(g) | H(I) | s | A | B | K), game-mode encodings.
pub fn client_proof(
    identifier: &str,
    key: &SessionKey,
    n: &BigUint,
    g: &BigUint,
    a: &BigUint,
    b: &BigUint,
    salt: &[u8],
) -> [u8; 20] {
    let n_hash = sha1_digest_20(n.to_bytes_le());
    let g_hash = sha1_digest_20(g.to_bytes_le());
    let i_hash = sha1_digest_20(identifier.as_bytes());

    let ng_hash: Vec<u8> = n_hash
        .iter()
        .zip(g_hash.iter())
        .map(|(n, g)| n ^ g)
        .collect();

    let padding = (n.bits() as usize + 7) / 8;
    let mut hasher = Sha1::new();
    hasher.update(&ng_hash);
    hasher.update(i_hash);
    hasher.update(salt);
    hasher.update(encode_le_padded(a, padding));
    hasher.update(encode_le_padded(b, padding));
    hasher.update(key.as_bytes());
    hasher
        .finalize()
        .as_slice()
        .try_into()
        .expect("sha1 digests are 20 bytes")
}

/// M2 = H(A | M1 | K), game-mode encodings.
pub fn server_proof(a: &BigUint, m1: &[u8; 20], key: &SessionKey, padding: usize) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(encode_le_padded(a, padding));
    hasher.update(m1);
    hasher.update(key.as_bytes());
    hasher
        .finalize()
        .as_slice()
        .try_into()
        .expect("sha1 digests are 20 bytes")
}
