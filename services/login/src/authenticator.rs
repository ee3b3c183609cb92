//! The two proof checkers driven by the login state machine: a full
//! SRP6 exchange for fresh logins and the lightweight hash check for
//! reconnects.

use num_bigint::BigUint;
use sha1::{Digest, Sha1};
use wow_srp6::{util, Generator, Group, Mode, Salt, Server, SessionKey, Verifier};

/// Outcome of a successful proof check.
#[derive(Debug, Clone)]
pub struct ProofResult {
    pub session_key: SessionKey,
    pub server_proof: [u8; 20],
}

/// Holds the SRP6 server state for one login attempt.
#[derive(Debug, Clone)]
pub struct LoginAuthenticator {
    username: String,
    salt: Salt,
    server: Server,
}

impl LoginAuthenticator {
    pub fn new(username: &str, salt: Salt, verifier: &Verifier) -> Self {
        let gen = Generator::new(Group::Game256);
        let server = Server::new(gen, BigUint::from(verifier));

        Self {
            username: username.to_uppercase(),
            salt,
            server,
        }
    }

    /// The values sent in the login challenge.
    pub fn challenge(&self) -> ([u8; 32], Vec<u8>, Vec<u8>, Salt) {
        let b_pub: [u8; 32] = self
            .server
            .public_ephemeral_bytes()
            .try_into()
            .expect("game group is 32 bytes");

        let gen = self.server.generator();
        (
            b_pub,
            gen.generator().to_bytes_le(),
            gen.prime().to_bytes_le(),
            self.salt,
        )
    }

    /// Verify the client proof; on a match, yields the session key and
    /// the server's counter-proof.
    pub fn proof_check(
        &self,
        public_key: &[u8; 32],
        client_proof: &[u8; 20],
    ) -> Option<ProofResult> {
        let a = BigUint::from_bytes_le(public_key);
        let key = self.server.session_key(&a, Mode::Game).ok()?;

        let gen = self.server.generator();
        let expected = util::client_proof(
            &self.username,
            &key,
            gen.prime(),
            gen.generator(),
            &a,
            self.server.public_ephemeral(),
            &self.salt.0,
        );

        if &expected != client_proof {
            return None;
        }

        let server_proof = self.server.generate_proof(&key, &a, client_proof);
        Some(ProofResult {
            session_key: key,
            server_proof,
        })
    }
}

/// Validates a reconnect proof against the cached session key; SRP6 is
/// not re-run.
#[derive(Debug, Clone)]
pub struct ReconnectAuthenticator {
    username: String,
    session_key: SessionKey,
    salt: [u8; 16],
}

impl ReconnectAuthenticator {
    pub fn new(username: &str, session_key: SessionKey, salt: [u8; 16]) -> Self {
        Self {
            username: username.to_uppercase(),
            session_key,
            salt,
        }
    }

    /// R2 = H(username | R1 | salt | K)
    pub fn proof_check(&self, proof_data: &[u8; 16], client_proof: &[u8; 20]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(self.username.as_bytes());
        hasher.update(proof_data);
        hasher.update(self.salt);
        hasher.update(self.session_key.as_bytes());
        hasher.finalize().as_slice() == client_proof
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }
}
