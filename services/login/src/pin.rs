//! Second-factor verification: the fixed-PIN grid remap and TOTP.
//!
//! The client scrambles its numpad layout with a server-provided seed,
//! so the expected input is the sequence of button *positions*, not
//! the PIN digits themselves. The server re-derives the layout from
//! the same seed to compute the sequence it should see.

use hmac::{Hmac, Mac, NewMac};
use rand::{Rng, RngCore};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::debug;

const GRID_SIZE: usize = 10;
const MIN_PIN_LENGTH: usize = 4;
const MAX_PIN_LENGTH: usize = 10;

/// TOTP interval length in seconds, per RFC 6238.
const TOTP_INTERVAL: u64 = 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PinError {
    #[error("provided PIN was too short")]
    TooShort,
    #[error("provided PIN was too long")]
    TooLong,
    #[error("unable to base32 decode TOTP secret")]
    BadTotpSecret,
}

/// Per-login second-factor state: the grid seed and server salt sent
/// in the challenge.
#[derive(Debug, Clone, Copy)]
pub struct PinAuthenticator {
    grid_seed: u32,
    server_salt: [u8; 16],
}

impl PinAuthenticator {
    pub fn new() -> Self {
        let mut server_salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut server_salt);

        Self {
            grid_seed: rand::thread_rng().gen(),
            server_salt,
        }
    }

    /// Deterministic construction for tests and replayed logins.
    pub fn with_seed(grid_seed: u32, server_salt: [u8; 16]) -> Self {
        Self {
            grid_seed,
            server_salt,
        }
    }

    pub fn grid_seed(&self) -> u32 {
        self.grid_seed
    }

    pub fn server_salt(&self) -> &[u8; 16] {
        &self.server_salt
    }

    /// Validate a fixed-PIN proof.
    pub fn validate_fixed(
        &self,
        pin: u32,
        client_salt: &[u8; 16],
        client_hash: &[u8; 20],
    ) -> bool {
        match self.calculate_hash(pin, client_salt) {
            Ok(hash) => hash == *client_hash,
            Err(e) => {
                debug!("fixed PIN rejected: {}", e);
                false
            }
        }
    }

    /// Validate a TOTP proof, trying the adjacent intervals to absorb
    /// clock drift.
    pub fn validate_totp(
        &self,
        secret: &str,
        client_salt: &[u8; 16],
        client_hash: &[u8; 20],
        unix_time: u64,
    ) -> bool {
        for interval in -1..=1 {
            let pin = match generate_totp(secret, interval, unix_time) {
                Ok(pin) => pin,
                Err(e) => {
                    debug!("TOTP generation failed: {}", e);
                    return false;
                }
            };

            if let Ok(hash) = self.calculate_hash(pin, client_salt) {
                if hash == *client_hash {
                    return true;
                }
            }
        }

        false
    }

    /// x = H(client_salt | H(server_salt | ascii(remapped pin)))
    ///
    /// This is the hash a well-behaved client produces; the validators
    /// recompute it from the stored PIN and compare.
    pub fn calculate_hash(&self, pin: u32, client_salt: &[u8; 16]) -> Result<[u8; 20], PinError> {
        let mut bytes = pin_to_bytes(pin)?;
        remap_pin(&mut bytes, &remap_pin_grid(self.grid_seed));
        pin_to_ascii(&mut bytes);

        let mut hasher = Sha1::new();
        hasher.update(self.server_salt);
        hasher.update(&bytes);
        let inner = hasher.finalize();

        let mut hasher = Sha1::new();
        hasher.update(client_salt);
        hasher.update(&inner);
        Ok(hasher
            .finalize()
            .as_slice()
            .try_into()
            .expect("sha1 digests are 20 bytes"))
    }
}

impl Default for PinAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a PIN such as 16785 into the byte array {1, 6, 7, 8, 5}.
fn pin_to_bytes(mut pin: u32) -> Result<Vec<u8>, PinError> {
    let mut bytes = Vec::with_capacity(MAX_PIN_LENGTH);

    while pin != 0 {
        if bytes.len() == MAX_PIN_LENGTH {
            return Err(PinError::TooLong);
        }

        bytes.push((pin % 10) as u8);
        pin /= 10;
    }

    if bytes.len() < MIN_PIN_LENGTH {
        return Err(PinError::TooShort);
    }

    bytes.reverse();
    Ok(bytes)
}

/// Derive the scrambled numpad layout from the grid seed: repeatedly
/// pick index `seed % remaining` out of the shrinking digit list.
fn remap_pin_grid(mut seed: u32) -> [u8; GRID_SIZE] {
    let mut grid: Vec<u8> = (0..GRID_SIZE as u8).collect();
    let mut remapped = [0u8; GRID_SIZE];

    for (slot, out) in remapped.iter_mut().enumerate() {
        let remaining = (GRID_SIZE - slot) as u32;
        let index = (seed % remaining) as usize;
        seed /= remaining;
        *out = grid.remove(index);
    }

    remapped
}

/// Replace each PIN digit with the position of that digit's button in
/// the scrambled layout.
fn remap_pin(bytes: &mut [u8], grid: &[u8; GRID_SIZE]) {
    for byte in bytes {
        let position = grid
            .iter()
            .position(|&digit| digit == *byte)
            .expect("digits 0-9 are always present");
        *byte = position as u8;
    }
}

/// The client hashes the digits as ASCII, so the server must too.
fn pin_to_ascii(bytes: &mut [u8]) {
    for byte in bytes {
        *byte += 0x30;
    }
}

/// RFC 6238 code for the secret at `unix_time`, shifted by `interval`
/// steps.
pub fn generate_totp(secret: &str, interval: i64, unix_time: u64) -> Result<u32, PinError> {
    let key = base32::decode(base32::Alphabet::RFC4648 { padding: false }, secret)
        .ok_or(PinError::BadTotpSecret)?;

    let step = (unix_time / TOTP_INTERVAL) as i64 + interval;

    let mut mac =
        Hmac::<Sha1>::new_from_slice(&key).map_err(|_| PinError::BadTotpSecret)?;
    mac.update(&(step as u64).to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0xF) as usize;
    let mut pin = u32::from(digest[offset] & 0x7F) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);

    pin &= 0x7FFF_FFFF;
    pin %= 1_000_000;
    Ok(pin)
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::{generate_totp, pin_to_bytes, remap_pin, remap_pin_grid, PinAuthenticator, PinError};

    #[test]
    pub fn grid_seed_zero_is_identity() {
        let grid = remap_pin_grid(0);
        assert_eq!(grid, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    pub fn grid_remap_consumes_seed() {
        // seed 1: first pick is index 1, the rest of the seed is 0
        let grid = remap_pin_grid(1);
        assert_eq!(grid, [1, 0, 2, 3, 4, 5, 6, 7, 8, 9]);

        // every digit appears exactly once regardless of seed
        let mut grid = remap_pin_grid(0xDEAD_BEEF);
        grid.sort_unstable();
        assert_eq!(grid, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    pub fn pin_digits_map_to_button_positions() {
        // layout 0, 4, 1, 6, 2, ... : PIN digit 1 sits at position 2
        let grid = [0, 4, 1, 6, 2, 3, 5, 7, 8, 9];
        let mut pin = vec![1, 2, 3];
        remap_pin(&mut pin, &grid);
        assert_eq!(pin, vec![2, 4, 5]);
    }

    #[test_case(1785, Ok(vec![1, 7, 8, 5]))]
    #[test_case(16785, Ok(vec![1, 6, 7, 8, 5]))]
    #[test_case(123, Err(PinError::TooShort))]
    #[test_case(0, Err(PinError::TooShort))]
    pub fn pin_byte_conversion(pin: u32, expected: Result<Vec<u8>, PinError>) {
        assert_eq!(pin_to_bytes(pin), expected);
    }

    /// Computes the hash the way the client does and checks the server
    /// accepts it.
    fn client_hash(
        auth: &PinAuthenticator,
        pin: u32,
        client_salt: &[u8; 16],
    ) -> [u8; 20] {
        auth.calculate_hash(pin, client_salt).unwrap()
    }

    #[test]
    pub fn fixed_pin_accepted() {
        let auth = PinAuthenticator::with_seed(0x1234_5678, [7; 16]);
        let client_salt = [3; 16];
        let hash = client_hash(&auth, 1785, &client_salt);

        assert!(auth.validate_fixed(1785, &client_salt, &hash));
        assert!(!auth.validate_fixed(1786, &client_salt, &hash));
        assert!(!auth.validate_fixed(1785, &[4; 16], &hash));
    }

    #[test]
    pub fn seed_changes_expected_sequence() {
        let client_salt = [3; 16];
        let a = PinAuthenticator::with_seed(1, [7; 16]);
        let b = PinAuthenticator::with_seed(2, [7; 16]);
        assert_ne!(
            client_hash(&a, 1785, &client_salt),
            client_hash(&b, 1785, &client_salt)
        );
    }

    /// RFC 6238 appendix vector: ASCII key "12345678901234567890" at
    /// T = 59s yields 94287082; the game truncates to six digits.
    #[test]
    pub fn totp_reference_vector() {
        let secret = base32::encode(
            base32::Alphabet::RFC4648 { padding: false },
            b"12345678901234567890",
        );

        let pin = generate_totp(&secret, 0, 59).unwrap();
        assert_eq!(pin, 287_082);
    }

    #[test]
    pub fn totp_accepts_adjacent_interval() {
        let secret = base32::encode(
            base32::Alphabet::RFC4648 { padding: false },
            b"12345678901234567890",
        );

        let auth = PinAuthenticator::with_seed(99, [1; 16]);
        let client_salt = [2; 16];

        // the client computed its code one interval ago
        let stale_pin = generate_totp(&secret, 0, 59).unwrap();
        let hash = client_hash(&auth, stale_pin, &client_salt);
        assert!(auth.validate_totp(&secret, &client_salt, &hash, 59 + 30));
        assert!(!auth.validate_totp(&secret, &client_salt, &hash, 59 + 120));
    }
}
