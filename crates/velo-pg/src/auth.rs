//! SCRAM-SHA-256 authentication (RFC 5802, Postgres 10+).
//!
//! The exchange is driven by the connection handshake: the server picks the
//! mechanism, [`ScramFlow`] produces the client messages and verifies the
//! server signature. Postgres takes the username from the startup packet
//! and ignores the SCRAM `n=` field, so the client-first message carries an
//! empty name.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};

use velo_error::{ConnectionError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The only SASL mechanism this client speaks.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

fn auth_err(msg: impl Into<String>) -> velo_error::Error {
    ConnectionError::Auth(msg.into()).into()
}

/// Client side of one SCRAM-SHA-256 exchange. Single use.
pub struct ScramFlow {
    password: String,
    nonce:    String,
    verifier: Option<Verifier>,
}

/// Carried between client-final and server-final for signature checking.
struct Verifier {
    auth_message: Vec<u8>,
    server_key:   Vec<u8>,
}

impl ScramFlow {
    /// Start an exchange for `password` with a fresh random nonce.
    #[must_use]
    pub fn new(password: &str) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: Vec<u8> = (0..24).map(|_| rng.gen()).collect();
        Self {
            password: password.to_string(),
            nonce:    BASE64.encode(nonce_bytes),
            verifier: None,
        }
    }

    /// The client-first message, sent inside SASLInitialResponse.
    #[must_use]
    pub fn first_message(&self) -> String {
        // gs2-header "n,," = no channel binding; empty username (see module doc)
        format!("n,,n=,r={}", self.nonce)
    }

    /// Consume the server-first message, produce the client-final message.
    ///
    /// # Errors
    ///
    /// Fails if the server message is malformed or its nonce does not
    /// extend ours.
    pub fn continue_with(&mut self, server_first: &str) -> Result<String> {
        let (server_nonce, salt_b64, iterations) = parse_server_first(server_first)?;

        if !server_nonce.starts_with(&self.nonce) {
            return Err(auth_err("server nonce does not extend client nonce"));
        }

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|_| auth_err("undecodable salt in server-first message"))?;

        let channel_binding = BASE64.encode(b"n,,");
        let client_final_bare = format!("c={channel_binding},r={server_nonce}");
        let client_first_bare = format!("n=,r={}", self.nonce);
        let auth_message = format!("{client_first_bare},{server_first},{client_final_bare}");

        let salted = salted_password(&self.password, &salt, iterations);
        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac(stored_key.as_slice(), auth_message.as_bytes())?;

        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        self.verifier = Some(Verifier {
            auth_message: auth_message.clone().into_bytes(),
            server_key:   hmac(&salted, b"Server Key")?,
        });

        Ok(format!("{client_final_bare},p={}", BASE64.encode(proof)))
    }

    /// Verify the server-final message (`v=<signature>`).
    ///
    /// # Errors
    ///
    /// Fails if the exchange is out of order, the message is malformed, or
    /// the signature does not match — the latter means the server never
    /// knew the password.
    pub fn finish(&self, server_final: &str) -> Result<()> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| auth_err("server-final before client-final"))?;

        let signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or_else(|| auth_err("missing v= in server-final message"))?;
        let signature = BASE64
            .decode(signature_b64)
            .map_err(|_| auth_err("undecodable server signature"))?;

        let expected = hmac(&verifier.server_key, &verifier.auth_message)?;
        if constant_time_eq(&signature, &expected) {
            Ok(())
        } else {
            Err(auth_err("server signature verification failed"))
        }
    }
}

/// Parse `r=<nonce>,s=<salt>,i=<iterations>`.
fn parse_server_first(msg: &str) -> Result<(String, String, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in msg.split(',') {
        if let Some(v) = part.strip_prefix("r=") {
            nonce = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            salt = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("i=") {
            iterations = v.parse().ok();
        }
    }

    match (nonce, salt, iterations) {
        (Some(n), Some(s), Some(i)) => Ok((n, s, i)),
        _ => Err(auth_err("incomplete server-first message")),
    }
}

fn salted_password(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut out = vec![0u8; 32];
    let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| auth_err("invalid HMAC key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
