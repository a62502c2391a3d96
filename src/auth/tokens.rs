use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Random bytes per token. 128 bits.
pub const TOKEN_BYTES: usize = 16;

/// Which digest a token is checked against.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Remember,
    Activation,
    Reset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Remember => "remember",
            TokenPurpose::Activation => "activation",
            TokenPurpose::Reset => "reset",
        }
    }
}

/// Opaque URL-safe token from the OS RNG.
pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}
