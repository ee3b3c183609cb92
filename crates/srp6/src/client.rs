use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;

use crate::{
    util::{self, Mode},
    Generator, SessionKey, Srp6Error,
};

/// The client side of the handshake.
///
/// Mirrors [`crate::Server`]; used by the test suite to drive full
/// handshakes and by tooling that needs to act as a game client.
#[derive(Clone, Debug)]
pub struct Client {
    identifier: String,
    password: String,
    gen: Generator,
    a: BigUint,
    a_pub: BigUint,
}

impl Client {
    /// Create a client with a fresh random ephemeral secret.
    pub fn new(identifier: &str, password: &str, gen: Generator) -> Self {
        let mut bytes = vec![0u8; gen.prime_len()];
        rand::thread_rng().fill_bytes(&mut bytes);
        let a = BigUint::from_bytes_le(&bytes) % gen.prime();
        Self::with_ephemeral(identifier, password, gen, a)
    }

    /// Create a client with an injected ephemeral secret.
    pub fn with_ephemeral(identifier: &str, password: &str, gen: Generator, a: BigUint) -> Self {
        let a_pub = gen.generator().modpow(&a, gen.prime());

        Self {
            identifier: identifier.to_string(),
            password: password.to_string(),
            gen,
            a,
            a_pub,
        }
    }

    pub fn public_ephemeral(&self) -> &BigUint {
        &self.a_pub
    }

    /// The public ephemeral in wire order, padded to the prime's width.
    pub fn public_ephemeral_bytes(&self) -> Vec<u8> {
        util::encode_le_padded(&self.a_pub, self.gen.prime_len())
    }

    /// Compute the shared session key from the server's public B.
    pub fn session_key(
        &self,
        b_pub: &BigUint,
        salt: &[u8],
        mode: Mode,
    ) -> Result<SessionKey, Srp6Error> {
        let n = self.gen.prime();

        if (b_pub % n).is_zero() {
            return Err(Srp6Error::InvalidEphemeral);
        }

        let x = util::compute_x(&self.identifier, &self.password, salt, mode);
        let u = util::scrambler(&self.a_pub, b_pub, self.gen.prime_len(), mode);
        let k = util::compute_k(self.gen.generator(), n);

        // S = (B - kg^x)^(a + ux), computed mod N to stay non-negative
        let kg_x = (k * self.gen.generator().modpow(&x, n)) % n;
        let base = ((b_pub % n) + n - kg_x) % n;
        let premaster = base.modpow(&(&self.a + u * x), n);

        Ok(util::derive_session_key(&premaster, mode))
    }

    /// M1, proving to the server that the client derived K.
    pub fn generate_proof(&self, key: &SessionKey, b_pub: &BigUint, salt: &[u8]) -> [u8; 20] {
        util::client_proof(
            &self.identifier,
            key,
            self.gen.prime(),
            self.gen.generator(),
            &self.a_pub,
            b_pub,
            salt,
        )
    }
}

#[cfg(test)]
mod test {
    use num_bigint::BigUint;

    use crate::{
        util::{self, Mode},
        Client, Generator, Group, Server, Srp6Error,
    };

    fn hex(value: &str) -> BigUint {
        BigUint::parse_bytes(value.as_bytes(), 16).expect("valid hex")
    }

    /// Wire-order salt for a salt expressed as a big-endian integer.
    fn wire_salt(value: &str) -> Vec<u8> {
        let mut bytes = hex(value).to_bytes_be();
        bytes.reverse();
        bytes
    }

    fn proof_bytes(value: &str) -> [u8; 20] {
        let mut bytes = hex(value).to_bytes_le();
        bytes.resize(20, 0);
        bytes.try_into().expect("20 byte proof")
    }

    #[test]
    fn rfc5054_test_vectors() {
        let gen = Generator::new(Group::Rfc5054_1024);
        let salt = hex("BEB25379D1A8581EB5A727673A2441EE").to_bytes_be();

        let k = util::compute_k(gen.generator(), gen.prime());
        assert_eq!(k, hex("7556AA045AEF2CDD07ABAF0F665C3E818913186F"));

        let x = util::compute_x("alice", "password123", &salt, Mode::Rfc5054);
        assert_eq!(x, hex("94B7555AABE9127CC58CCF4993DB6CF84D16C124"));

        let v = util::generate_verifier("alice", "password123", &gen, &salt, Mode::Rfc5054);
        assert_eq!(
            v,
            hex("7E273DE8696FFC4F4E337D05B4B375BEB0DDE1569E8FA00A9886D8129BADA1F1822\
                 223CA1A605B530E379BA4729FDC59F105B4787E5186F5C671085A1447B52A48CF1970\
                 B4FB6F8400BBF4CEBFBB168152E08AB5EA53D15C1AFF87B2B9DA6E04E058AD51CC72B\
                 FC9033B564E26480D78E955A5E29E7AB245DB2BE315E2099AFB")
        );

        let a = hex("60975527035CF2AD1989806F0407210BC81EDC04E2762A56AFD529DDDA2D4393");
        let b = hex("E487CB59D31AC550471E81F00F6928E01DDA08E974A004F49E61F5D105284D20");

        let client = Client::with_ephemeral("alice", "password123", gen.clone(), a);
        let server = Server::with_ephemeral(gen.clone(), v, b);

        let expected_a = hex(
            "61D5E490F6F1B79547B0704C436F523DD0E560F0C64115BB72557EC4\
             4352E8903211C04692272D8B2D1A5358A2CF1B6E0BFCF99F921530EC\
             8E39356179EAE45E42BA92AEACED825171E1E8B9AF6D9C03E1327F44\
             BE087EF06530E69F66615261EEF54073CA11CF5858F0EDFDFE15EFEA\
             B349EF5D76988A3672FAC47B0769447B",
        );
        assert_eq!(client.public_ephemeral(), &expected_a);

        let expected_b = hex(
            "BD0C61512C692C0CB6D041FA01BB152D4916A1E77AF46AE105393011\
             BAF38964DC46A0670DD125B95A981652236F99D9B681CBF87837EC99\
             6C6DA04453728610D0C6DDB58B318885D7D82C7F8DEB75CE7BD4FBAA\
             37089E6F9C6059F388838E7A00030B331EB76840910440B1B27AAEAE\
             EB4012B7D7665238A8E3FB004B117B58",
        );
        assert_eq!(server.public_ephemeral(), &expected_b);

        let u = util::scrambler(&expected_a, &expected_b, gen.prime_len(), Mode::Rfc5054);
        assert_eq!(u, hex("CE38B9593487DA98554ED47D70A7AE5F462EF019"));

        let expected_key = hex(
            "B0DC82BABCF30674AE450C0287745E7990A3381F63B387AAF271A10D\
             233861E359B48220F7C4693C9AE12B0A6F67809F0876E2D013800D6C\
             41BB59B6D5979B5C00A172B4A2A5903A0BDCAF8A709585EB2AFAFA8F\
             3499B200210DCC1F10EB33943CD67FC88A2F39A4BE5BEC4EC0A3212D\
             C346D7E474B29EDE8A469FFECA686E5A",
        );

        let c_key = client
            .session_key(&expected_b, &salt, Mode::Rfc5054)
            .unwrap();
        let s_key = server.session_key(&expected_a, Mode::Rfc5054).unwrap();

        assert_eq!(BigUint::from_bytes_be(c_key.as_bytes()), expected_key);
        assert_eq!(BigUint::from_bytes_be(s_key.as_bytes()), expected_key);
    }

    #[test]
    fn self_authentication() {
        let gen = Generator::new(Group::Game256);
        let salt = crate::generate_salt();
        let v = util::generate_verifier("CHAOSVEX", "ABC", &gen, &salt.0, Mode::Game);

        let server = Server::new(gen.clone(), v);
        let client = Client::new("CHAOSVEX", "ABC", gen);

        let a = client.public_ephemeral().clone();
        let b = server.public_ephemeral().clone();

        let s_key = server.session_key(&a, Mode::Game).unwrap();
        let c_key = client.session_key(&b, &salt.0, Mode::Game).unwrap();
        assert_eq!(s_key, c_key);
        assert_eq!(s_key.as_bytes().len(), 40);

        let c_proof = client.generate_proof(&c_key, &b, &salt.0);
        let expected =
            util::client_proof("CHAOSVEX", &s_key, server.generator().prime(), server.generator().generator(), &a, &b, &salt.0);
        assert_eq!(c_proof, expected);

        let s_proof = server.generate_proof(&s_key, &a, &c_proof);
        let expected = util::server_proof(&a, &c_proof, &c_key, 32);
        assert_eq!(s_proof, expected);
    }

    /// Replays the parameters of a known-good login.
    #[test]
    fn game_authentication_replay() {
        let b = BigUint::parse_bytes(
            b"18593985542940560649451045851874319089347482848983190581196134045699448046190",
            10,
        )
        .unwrap();
        let a = BigUint::parse_bytes(
            b"59852229564408135463856204462249479723343699701058170755060257585995770179058",
            10,
        )
        .unwrap();
        let m1 = BigUint::parse_bytes(b"1198251478626595859038225880380336340559256984824", 10)
            .unwrap();
        let m2 = BigUint::parse_bytes(b"859932068100996518188190846072995264590638975226", 10)
            .unwrap();

        let salt = wire_salt("F4C7DBCA7138DA48D9B7BE55C0C76B1145AF67340CF7A6718D452A563E12A19C");
        let verifier = hex("37A75AE5BCF38899C75D28688C78434CB690657B5D8D77463668B83D0062A186");

        let gen = Generator::new(Group::Game256);
        let server = Server::with_ephemeral(gen.clone(), verifier, b);

        let key = server.session_key(&a, Mode::Game).unwrap();
        let m1_s = util::client_proof(
            "CHAOSVEX",
            &key,
            gen.prime(),
            gen.generator(),
            &a,
            server.public_ephemeral(),
            &salt,
        );

        let mut m1_expected = m1.to_bytes_le();
        m1_expected.resize(20, 0);
        assert_eq!(m1_s.as_slice(), m1_expected.as_slice());

        let m2_s = server.generate_proof(&key, &a, &m1_s);
        let mut m2_expected = m2.to_bytes_le();
        m2_expected.resize(20, 0);
        assert_eq!(m2_s.as_slice(), m2_expected.as_slice());
    }

    #[test]
    fn zero_ephemeral_rejected() {
        let gen = Generator::new(Group::Game256);
        let salt = crate::generate_salt();
        let v = util::generate_verifier("CHAOSVEX", "ABC", &gen, &salt.0, Mode::Game);

        let server = Server::new(gen.clone(), v);
        assert_eq!(
            server.session_key(&BigUint::from(0u8), Mode::Game),
            Err(Srp6Error::InvalidEphemeral)
        );

        // a multiple of the prime reduces to zero
        let n2 = gen.prime() * 2u8;
        assert_eq!(
            server.session_key(&n2, Mode::Game),
            Err(Srp6Error::InvalidEphemeral)
        );

        let client = Client::new("CHAOSVEX", "ABC", gen);
        assert_eq!(
            client.session_key(&BigUint::from(0u8), &salt.0, Mode::Game),
            Err(Srp6Error::InvalidEphemeral)
        );
    }

    #[test]
    fn salt_zero_pad_compute_x() {
        let salt = wire_salt("BEB25379D1A8581EB5A727673A2441EE");
        let x = util::compute_x("alice", "password123", &salt, Mode::Game);
        assert_eq!(x, hex("7E5250F2CB894FD9703611318C387A773FD52C09"));
    }

    #[test]
    fn salt_zero_pad_generate_verifier() {
        let gen = Generator::new(Group::Game256);
        let salt = wire_salt("BEB25379D1A8581EB5A727673A2441EE");
        let v = util::generate_verifier("alice", "password123", &gen, &salt, Mode::Game);
        assert_eq!(
            v,
            hex("399CF53C149F220F4AA88F7F2F6CA9CB6E4C44EA5240AC0F65601F392F32A16A")
        );
    }

    #[test]
    fn n_pad_generate_client_proof() {
        let gen = Generator::new(Group::Game256);
        let a = hex("52DFA6644066547BD7360AD2A23AE91DB544FADB8F4DCA86B4184481102E4089");
        let b = hex("809C1BC78BDB3873D286FDADF38D1524348C9CA5AB63E7793EF6A7944C5A8D");
        let key = crate::SessionKey(
            hex("42C6518D6F338C050717427B18F7C6B6131C968B0CFC20C43AAAD61625F286DA55E24BF6A2CBDC79")
                .to_bytes_be(),
        );

        let salt_be = [
            0x40, 0x1A, 0x08, 0x7D, 0x89, 0x73, 0x9D, 0xD9, 0xE4, 0x2F, 0x1E, 0x7E, 0x41, 0x65,
            0xFD, 0xA4, 0x21, 0x41, 0xF4, 0xFD, 0x4A, 0xD3, 0x2D, 0x03, 0xC1, 0xF2, 0x07, 0x66,
            0x88, 0x06, 0xE5, 0x41,
        ];
        let salt: Vec<u8> = salt_be.iter().rev().copied().collect();

        let proof = util::client_proof("TEST", &key, gen.prime(), gen.generator(), &a, &b, &salt);
        assert_eq!(proof, proof_bytes("F9C97B36A797001F7D31CC0EB3E741B8B216B564"));
    }

    #[test]
    fn s_pad_verify_key() {
        let gen = Generator::new(Group::Game256);
        let v = hex("570B18E774242FAC149DB63458E8BA7C67C8CCD18F8C1B2779848703523AF502");
        let a_pub = hex("3AD9948BCEE582A3BFCEABC895B22FB3F0208E5D444D07CAA580CE24B1DEFC70");
        let b = hex("3865DD04A190926F04B241820503B53F8BF21B2C161FB2FE038B662943936A53");

        let server = Server::with_ephemeral(gen, v, b);
        let key = server.session_key(&a_pub, Mode::Game).unwrap();
        assert_eq!(
            BigUint::from_bytes_be(key.as_bytes()),
            hex("EE57F5996D4EEDFFDE38EE79492AB4A5E57CD25C3CE98B035D4BA9A7E05D56C0DAF0F30D9797C216")
        );
    }
}
