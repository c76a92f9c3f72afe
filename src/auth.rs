// Copyright 2026 The vncmirror Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC Authentication (DES challenge/response).
//!
//! The server sends a random 16-byte challenge; the client returns it
//! DES-ECB-encrypted under a key derived from the password. Per the VNC
//! quirk, the key is the first 8 password bytes (zero padded) with the bits
//! of each byte reversed.

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;

/// Challenge/response verifier for the VNC Authentication security type.
pub struct VncAuth {
    password: String,
}

impl VncAuth {
    /// Creates a verifier for the given password.
    #[must_use]
    pub fn new(password: String) -> Self {
        Self { password }
    }

    /// Generates a random 16-byte challenge.
    #[must_use]
    pub fn generate_challenge() -> [u8; 16] {
        rand::random()
    }

    /// Checks a client's 16-byte response against the challenge.
    #[must_use]
    pub fn verify_response(&self, response: &[u8], challenge: &[u8; 16]) -> bool {
        if response.len() != 16 {
            return false;
        }
        match encrypt_challenge(&self.password, challenge) {
            Some(expected) => expected == response,
            None => false,
        }
    }
}

/// Encrypts both 8-byte challenge blocks under the password key.
fn encrypt_challenge(password: &str, challenge: &[u8; 16]) -> Option<[u8; 16]> {
    let mut key = [0u8; 8];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }

    let cipher = Des::new_from_slice(&key).ok()?;
    let mut out = *challenge;
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_correct_response() {
        let auth = VncAuth::new("secret".into());
        let challenge = VncAuth::generate_challenge();
        let response = encrypt_challenge("secret", &challenge).unwrap();
        assert!(auth.verify_response(&response, &challenge));
    }

    #[test]
    fn rejects_wrong_password() {
        let auth = VncAuth::new("secret".into());
        let challenge = VncAuth::generate_challenge();
        let response = encrypt_challenge("wrong", &challenge).unwrap();
        assert!(!auth.verify_response(&response, &challenge));
    }

    #[test]
    fn rejects_malformed_response() {
        let auth = VncAuth::new("secret".into());
        let challenge = VncAuth::generate_challenge();
        assert!(!auth.verify_response(&[0u8; 8], &challenge));
    }

    #[test]
    fn key_uses_at_most_eight_password_bytes() {
        let challenge = VncAuth::generate_challenge();
        let a = encrypt_challenge("12345678", &challenge).unwrap();
        let b = encrypt_challenge("12345678ignored", &challenge).unwrap();
        assert_eq!(a, b);
    }
}
