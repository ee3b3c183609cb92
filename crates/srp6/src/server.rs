use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;

use crate::{
    util::{self, Mode},
    Generator, SessionKey, Srp6Error,
};

/// The server side of the handshake.
///
/// The server is constructed from a stored verifier and publishes its
/// ephemeral B; [`Server::session_key`] consumes the client's public A
/// and yields the shared key used to verify the client's proof.
#[derive(Clone, Debug)]
pub struct Server {
    gen: Generator,
    verifier: BigUint,
    b: BigUint,
    b_pub: BigUint,
}

impl Server {
    /// Create a server with a fresh random ephemeral secret.
    pub fn new(gen: Generator, verifier: BigUint) -> Self {
        let mut bytes = vec![0u8; gen.prime_len()];
        rand::thread_rng().fill_bytes(&mut bytes);
        let b = BigUint::from_bytes_le(&bytes) % gen.prime();
        Self::with_ephemeral(gen, verifier, b)
    }

    /// Create a server with an injected ephemeral secret, for
    /// deterministic sessions in tests and replayed logins.
    pub fn with_ephemeral(gen: Generator, verifier: BigUint, b: BigUint) -> Self {
        // B = (kv + g^b) mod N
        let k = util::compute_k(gen.generator(), gen.prime());
        let g_b = gen.generator().modpow(&b, gen.prime());
        let b_pub = (k * &verifier + g_b) % gen.prime();

        Self {
            gen,
            verifier,
            b,
            b_pub,
        }
    }

    pub fn public_ephemeral(&self) -> &BigUint {
        &self.b_pub
    }

    /// The public ephemeral in wire order, padded to the prime's width.
    pub fn public_ephemeral_bytes(&self) -> Vec<u8> {
        util::encode_le_padded(&self.b_pub, self.gen.prime_len())
    }

    pub fn generator(&self) -> &Generator {
        &self.gen
    }

    /// Compute the shared session key from the client's public A.
    pub fn session_key(&self, a_pub: &BigUint, mode: Mode) -> Result<SessionKey, Srp6Error> {
        if (a_pub % self.gen.prime()).is_zero() {
            return Err(Srp6Error::InvalidEphemeral);
        }

        let u = util::scrambler(a_pub, &self.b_pub, self.gen.prime_len(), mode);
        let premaster =
            (a_pub * self.verifier.modpow(&u, self.gen.prime())).modpow(&self.b, self.gen.prime());

        Ok(util::derive_session_key(&premaster, mode))
    }

    /// M2, proving to the client that the server also derived K.
    pub fn generate_proof(&self, key: &SessionKey, a_pub: &BigUint, m1: &[u8; 20]) -> [u8; 20] {
        util::server_proof(a_pub, m1, key, self.gen.prime_len())
    }
}
