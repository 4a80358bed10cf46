//! Random names for the core pipe.

use rand::{CryptoRng, RngCore};

/// Length of a generated name: 31 base32 characters, 155 bits.
pub const PIPE_NAME_LEN: usize = 31;

const ALPHABET: &[u8; 32] = b"0123456789bcdfghjklmnpqrstuvwxyz";

/// Generate a fresh pipe name from a cryptographic RNG.
pub fn generate_pipe_name<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut raw = [0u8; 20];
    rng.fill_bytes(&mut raw);

    let mut name = String::with_capacity(PIPE_NAME_LEN);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for byte in raw {
        acc = ((acc << 8) | u32::from(byte)) & 0xfff;
        bits += 8;
        while bits >= 5 && name.len() < PIPE_NAME_LEN {
            bits -= 5;
            name.push(char::from(ALPHABET[((acc >> bits) & 0x1f) as usize]));
        }
    }
    name
}
