//! Client binary integrity checking.
//!
//! At startup the expected client binaries for every allowed build are
//! concatenated into one blob per (build, platform, OS) triple. During
//! login the client proves it hashed the same bytes under a fresh
//! salt; on reconnect it only hashes the challenge salt.

use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context, Result};
use ebonhold_game::types::GameVersion;
use hmac::{Hmac, Mac, NewMac};
use sha1::{Digest, Sha1};
use tracing::debug;

const WIN_X86: [&str; 5] = [
    "WoW.exe",
    "fmod.dll",
    "ijl15.dll",
    "dbghelp.dll",
    "unicows.dll",
];

const MAC_X86: [&str; 5] = [
    "MacOS/World of Warcraft",
    "Info.plist",
    "Resources/Main.nib/objects.xib",
    "Resources/wow.icns",
    "PkgInfo",
];

const MAC_PPC: [&str; 5] = MAC_X86;

/// The (platform, OS) pairs binaries are shipped for, as the
/// four-character codes the client reports.
const TARGETS: [(&str, &str, &[&str; 5]); 3] = [
    ("x86", "Win", &WIN_X86),
    ("x86", "OSX", &MAC_X86),
    ("PPC", "OSX", &MAC_PPC),
];

type TripleKey = (u16, [u8; 4], [u8; 4]);

/// Concatenated binary blobs keyed by (build, platform, os).
#[derive(Debug, Default)]
pub struct IntegrityData {
    data: HashMap<TripleKey, Vec<u8>>,
}

impl IntegrityData {
    /// Load blobs from `<path>/<os>_<platform>_<build>/`, lowercased.
    /// Missing directories are skipped; at least one supported client
    /// must load or checking would reject everyone.
    pub fn load(path: &Path, versions: &[GameVersion]) -> Result<Self> {
        let mut data = HashMap::new();

        for version in versions {
            for (platform, os, files) in TARGETS {
                let dir = path.join(
                    format!("{}_{}_{}", os, platform, version.build).to_lowercase(),
                );

                if !dir.is_dir() {
                    continue;
                }

                let mut blob = Vec::new();
                for file in files {
                    let file_path = dir.join(file);
                    let bytes = std::fs::read(&file_path)
                        .with_context(|| format!("unable to read {}", file_path.display()))?;
                    blob.extend_from_slice(&bytes);
                }

                debug!(
                    "loaded {} integrity byte(s) for {}/{} build {}",
                    blob.len(),
                    platform,
                    os,
                    version.build
                );
                data.insert((version.build, fourcc(platform), fourcc(os)), blob);
            }
        }

        if data.is_empty() {
            bail!("client integrity checking is enabled but no binaries were found");
        }

        Ok(Self { data })
    }

    /// Construct from in-memory blobs.
    pub fn from_blobs(blobs: Vec<(TripleKey, Vec<u8>)>) -> Self {
        Self {
            data: blobs.into_iter().collect(),
        }
    }

    fn lookup(&self, build: u16, platform: [u8; 4], os: [u8; 4]) -> Option<&[u8]> {
        self.data
            .get(&(build, platform, os))
            .map(Vec::as_slice)
    }

    /// Check a login proof's checksum: the client hashed the binaries
    /// under the challenge salt, then folded in its public key.
    pub fn verify_login(
        &self,
        build: u16,
        platform: [u8; 4],
        os: [u8; 4],
        checksum_salt: &[u8; 16],
        public_key: &[u8; 32],
        client_checksum: &[u8; 20],
    ) -> bool {
        let blob = match self.lookup(build, platform, os) {
            Some(blob) => blob,
            None => return false,
        };

        let inner = checksum(checksum_salt, blob);
        finalise(&inner, public_key) == *client_checksum
    }

    /// The reconnect variant: the client skips the binaries and hashes
    /// a zeroed checksum with the proof data it sent.
    pub fn verify_reconnect(
        &self,
        build: u16,
        platform: [u8; 4],
        os: [u8; 4],
        proof_data: &[u8; 16],
        client_checksum: &[u8; 20],
    ) -> bool {
        if self.lookup(build, platform, os).is_none() {
            return false;
        }

        finalise(&[0u8; 20], proof_data) == *client_checksum
    }
}

/// The platform/OS codes arrive as reversed four-character codes, e.g.
/// "x86\0" on the wire is `b"68x\0"`.
pub fn fourcc(code: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (slot, byte) in out.iter_mut().zip(code.bytes().rev()) {
        *slot = byte;
    }
    out
}

/// Decode a wire four-character code back to its text form.
pub fn fourcc_to_string(code: [u8; 4]) -> String {
    code.iter()
        .rev()
        .filter(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

fn checksum(salt: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = Hmac::<Sha1>::new_from_slice(salt).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize()
        .into_bytes()
        .as_slice()
        .try_into()
        .expect("sha1 digests are 20 bytes")
}

fn finalise(checksum: &[u8; 20], tail: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(checksum);
    hasher.update(tail);
    hasher
        .finalize()
        .as_slice()
        .try_into()
        .expect("sha1 digests are 20 bytes")
}
