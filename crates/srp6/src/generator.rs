use lazy_static::lazy_static;
use num_bigint::BigUint;

lazy_static! {
    static ref GAME_G: BigUint = BigUint::from_bytes_be(&[7]);
    static ref GAME_N: BigUint = BigUint::from_bytes_be(&[
        0x89, 0x4B, 0x64, 0x5E, 0x89, 0xE1, 0x53, 0x5B, 0xBD, 0xAD, 0x5B, 0x8B, 0x29, 0x06, 0x50,
        0x53, 0x08, 0x01, 0xB1, 0x8E, 0xBF, 0xBF, 0x5E, 0x8F, 0xAB, 0x3C, 0x82, 0x87, 0x2A, 0x3E,
        0x9B, 0xB7,
    ]);
    static ref RFC5054_G: BigUint = BigUint::from_bytes_be(&[2]);
    static ref RFC5054_N: BigUint = BigUint::parse_bytes(
        b"EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C9C256576D674DF7496EA81D3383B\
          4813D692C6E0E0D5D8E250B98BE48E495C1D6089DAD15DC7D7B46154D6B6CE8EF4AD69B15D4982559B29\
          7BCF1885C529F566660E57EC68EDBC3C05726CC02FD4CBF4976EAA9AFD5138FE8376435B9FC61D2FC0EB\
          06E3",
        16
    )
    .expect("valid hex constant");
}

/// The two hard-coded parameter groups.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Group {
    /// The 256-bit prime used by the game client, g = 7.
    Game256,
    /// The 1024-bit RFC5054 test group, g = 2.
    Rfc5054_1024,
}

/// A (g, N) parameter pair for a handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generator {
    g: BigUint,
    n: BigUint,
}

impl Generator {
    pub fn new(group: Group) -> Self {
        match group {
            Group::Game256 => Self {
                g: GAME_G.clone(),
                n: GAME_N.clone(),
            },
            Group::Rfc5054_1024 => Self {
                g: RFC5054_G.clone(),
                n: RFC5054_N.clone(),
            },
        }
    }

    pub fn generator(&self) -> &BigUint {
        &self.g
    }

    pub fn prime(&self) -> &BigUint {
        &self.n
    }

    /// Width of the prime in bytes; used to zero-pad hash inputs.
    pub fn prime_len(&self) -> usize {
        (self.n.bits() as usize + 7) / 8
    }
}
