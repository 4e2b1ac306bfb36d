//! Cryptographic primitives for the Hull platform.
//!
//! Everything here is a pure function of its inputs except `random_bytes`,
//! which reads the system entropy source and fails closed when it is
//! unavailable. The capability layer and the signed-bundle protocol both
//! build on these; no other module touches a crypto crate directly.
//!
//! Hex encoding throughout is ASCII table lookup (`hex` crate) — no
//! format-string or locale-sensitive parsing anywhere on these paths.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CapError;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound for one `random_bytes` request.
pub const MAX_RANDOM_BYTES: usize = 4096;

/// PBKDF2 iteration count used by `hash_password`.
pub const PASSWORD_ITERATIONS: u32 = 100_000;

/// Salt length for `hash_password`, in bytes.
pub const PASSWORD_SALT_LEN: usize = 16;

/// Derived-key length for `hash_password`, in bytes.
pub const PASSWORD_HASH_LEN: usize = 32;

/// Secretbox/box nonce length.
pub const NONCE_LEN: usize = 24;

/// Symmetric and asymmetric key length.
pub const KEY_LEN: usize = 32;

/// Authentication tag length appended by secretbox/box.
pub const TAG_LEN: usize = 16;

// ── Hashing ──

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Compute the SHA-512 digest of `data`.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// SHA-256 of `data`, as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ── Entropy ──

/// Read `n` bytes from the system entropy source.
///
/// `n` must be in `1..=MAX_RANDOM_BYTES`. Fails closed: an unavailable
/// entropy source is an error, never weak output.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, CapError> {
    if n == 0 || n > MAX_RANDOM_BYTES {
        return Err(CapError::invalid(format!(
            "random: size must be 1..={}, got {}",
            MAX_RANDOM_BYTES, n
        )));
    }
    let mut buf = vec![0u8; n];
    rand::RngCore::try_fill_bytes(&mut rand::rngs::OsRng, &mut buf)
        .map_err(|e| CapError::Io(std::io::Error::other(e)))?;
    Ok(buf)
}

// ── Key derivation & passwords ──

/// Derive `length` bytes from a password and salt with PBKDF2-HMAC-SHA256.
///
/// `iterations` must be at least 1; `length` at most 256.
pub fn pbkdf2_derive(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Vec<u8>, CapError> {
    if iterations == 0 {
        return Err(CapError::invalid("pbkdf2: iterations must be >= 1"));
    }
    if length == 0 || length > 256 {
        return Err(CapError::invalid("pbkdf2: length must be 1..=256"));
    }
    let mut out = vec![0u8; length];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

/// Hash a password into a self-describing storable string:
/// `pbkdf2:<iterations>:<salt-hex:32>:<hash-hex:64>`.
///
/// A fresh 16-byte salt is drawn per call, so hashing the same password
/// twice yields two different strings.
pub fn hash_password(password: &str) -> Result<String, CapError> {
    let salt = random_bytes(PASSWORD_SALT_LEN)?;
    let mut key = pbkdf2_derive(
        password.as_bytes(),
        &salt,
        PASSWORD_ITERATIONS,
        PASSWORD_HASH_LEN,
    )?;
    let stored = format!(
        "pbkdf2:{}:{}:{}",
        PASSWORD_ITERATIONS,
        hex::encode(&salt),
        hex::encode(&key)
    );
    key.zeroize();
    Ok(stored)
}

/// Check a password against a `hash_password` string.
///
/// Malformed stored strings verify as false, never as an error — the
/// caller cannot distinguish "wrong password" from "corrupt record".
/// Comparison is constant-time across the full derived key.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split(':');
    let (scheme, iters, salt_hex, hash_hex) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(s), Some(i), Some(sa), Some(h), None) => (s, i, sa, h),
        _ => return false,
    };
    if scheme != "pbkdf2" {
        return false;
    }
    let iterations: u32 = match iters.parse() {
        Ok(n) if n >= 1 => n,
        _ => return false,
    };
    let salt = match hex::decode(salt_hex) {
        Ok(s) if s.len() == PASSWORD_SALT_LEN => s,
        _ => return false,
    };
    let expected = match hex::decode(hash_hex) {
        Ok(h) if h.len() == PASSWORD_HASH_LEN => h,
        _ => return false,
    };
    let mut derived =
        match pbkdf2_derive(password.as_bytes(), &salt, iterations, PASSWORD_HASH_LEN) {
            Ok(d) => d,
            Err(_) => return false,
        };
    let ok = bool::from(derived.ct_eq(&expected));
    derived.zeroize();
    ok
}

// ── Keyed MAC ──

/// Compute an HMAC-SHA256 authentication tag.
pub fn auth(message: &[u8], key: &[u8]) -> Result<[u8; 32], CapError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| CapError::invalid("auth: bad key"))?;
    mac.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn auth_verify(tag: &[u8], message: &[u8], key: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

// ── Ed25519 ──

/// Generate an Ed25519 keypair. Returns `(public, secret)`.
///
/// The secret is the 32-byte seed form; derive the public key from it
/// with `ed25519_dalek::SigningKey::from_bytes` when needed.
pub fn ed25519_keypair() -> Result<([u8; 32], [u8; 32]), CapError> {
    let mut seed = random_bytes(32)?;
    let mut sk_bytes = [0u8; 32];
    sk_bytes.copy_from_slice(&seed);
    seed.zeroize();
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&sk_bytes);
    Ok((signing_key.verifying_key().to_bytes(), sk_bytes))
}

/// Derive the Ed25519 public key for a 32-byte secret seed.
pub fn ed25519_public_key(secret_key: &[u8; 32]) -> [u8; 32] {
    ed25519_dalek::SigningKey::from_bytes(secret_key)
        .verifying_key()
        .to_bytes()
}

/// Sign `message` with an Ed25519 secret key.
pub fn ed25519_sign(message: &[u8], secret_key: &[u8; 32]) -> [u8; 64] {
    use ed25519_dalek::Signer;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(secret_key);
    signing_key.sign(message).to_bytes()
}

/// Verify an Ed25519 signature.
///
/// Returns `true` iff the signature is valid for the message under the
/// given public key. Malformed keys verify as false.
pub fn ed25519_verify(message: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> bool {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    verifying_key.verify(message, &sig).is_ok()
}

// ── Authenticated encryption ──

fn check_key_nonce(key: &[u8], nonce: &[u8], what: &str) -> Result<(), CapError> {
    if key.len() != KEY_LEN {
        return Err(CapError::invalid(format!("{what}: key must be {KEY_LEN} bytes")));
    }
    if nonce.len() != NONCE_LEN {
        return Err(CapError::invalid(format!(
            "{what}: nonce must be {NONCE_LEN} bytes"
        )));
    }
    Ok(())
}

/// Symmetric authenticated encryption (XSalsa20-Poly1305).
///
/// Output is the ciphertext with a 16-byte tag appended.
pub fn secretbox(message: &[u8], nonce: &[u8], key: &[u8]) -> Result<Vec<u8>, CapError> {
    use crypto_secretbox::aead::{Aead, KeyInit};
    use crypto_secretbox::XSalsa20Poly1305;

    check_key_nonce(key, nonce, "secretbox")?;
    let cipher = XSalsa20Poly1305::new_from_slice(key)
        .map_err(|_| CapError::invalid("secretbox: bad key"))?;
    cipher
        .encrypt(crypto_secretbox::Nonce::from_slice(nonce), message)
        .map_err(|_| CapError::invalid("secretbox: encryption failed"))
}

/// Open a `secretbox` ciphertext. Tampered input fails, it never
/// decrypts to garbage.
pub fn secretbox_open(ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<Vec<u8>, CapError> {
    use crypto_secretbox::aead::{Aead, KeyInit};
    use crypto_secretbox::XSalsa20Poly1305;

    check_key_nonce(key, nonce, "secretbox")?;
    if ciphertext.len() < TAG_LEN {
        return Err(CapError::invalid("secretbox: ciphertext too short"));
    }
    let cipher = XSalsa20Poly1305::new_from_slice(key)
        .map_err(|_| CapError::invalid("secretbox: bad key"))?;
    cipher
        .decrypt(crypto_secretbox::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CapError::invalid("secretbox: authentication failed"))
}

/// Generate an X25519 keypair for `box_seal`/`box_open`.
/// Returns `(public, secret)`.
pub fn box_keypair() -> Result<([u8; 32], [u8; 32]), CapError> {
    let mut seed = random_bytes(32)?;
    let mut sk_bytes = [0u8; 32];
    sk_bytes.copy_from_slice(&seed);
    seed.zeroize();
    let secret = crypto_box::SecretKey::from(sk_bytes);
    Ok((*secret.public_key().as_bytes(), sk_bytes))
}

/// Public-key authenticated encryption to `their_public` from `my_secret`.
pub fn box_seal(
    message: &[u8],
    nonce: &[u8],
    their_public: &[u8],
    my_secret: &[u8],
) -> Result<Vec<u8>, CapError> {
    use crypto_box::aead::Aead;

    check_key_nonce(my_secret, nonce, "box")?;
    if their_public.len() != KEY_LEN {
        return Err(CapError::invalid(format!("box: public key must be {KEY_LEN} bytes")));
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(their_public);
    let mut sk = [0u8; 32];
    sk.copy_from_slice(my_secret);
    let sbox = crypto_box::SalsaBox::new(
        &crypto_box::PublicKey::from(pk),
        &crypto_box::SecretKey::from(sk),
    );
    sk.zeroize();
    sbox.encrypt(crypto_box::Nonce::from_slice(nonce), message)
        .map_err(|_| CapError::invalid("box: encryption failed"))
}

/// Open a `box_seal` ciphertext from `their_public` addressed to
/// `my_secret`.
pub fn box_open(
    ciphertext: &[u8],
    nonce: &[u8],
    their_public: &[u8],
    my_secret: &[u8],
) -> Result<Vec<u8>, CapError> {
    use crypto_box::aead::Aead;

    check_key_nonce(my_secret, nonce, "box")?;
    if their_public.len() != KEY_LEN {
        return Err(CapError::invalid(format!("box: public key must be {KEY_LEN} bytes")));
    }
    if ciphertext.len() < TAG_LEN {
        return Err(CapError::invalid("box: ciphertext too short"));
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(their_public);
    let mut sk = [0u8; 32];
    sk.copy_from_slice(my_secret);
    let sbox = crypto_box::SalsaBox::new(
        &crypto_box::PublicKey::from(pk),
        &crypto_box::SecretKey::from(sk),
    );
    sk.zeroize();
    sbox.decrypt(crypto_box::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CapError::invalid("box: authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let h = sha256(b"");
        assert_eq!(h[0], 0xe3);
        assert_eq!(h[1], 0xb0);
        assert_eq!(h[31], 0x55);
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha512_width() {
        let h = sha512(b"hull");
        assert_eq!(h.len(), 64);
        assert_ne!(h[..32], sha256(b"hull"));
    }

    #[test]
    fn test_random_bounds() {
        assert!(random_bytes(0).is_err());
        assert!(random_bytes(MAX_RANDOM_BYTES + 1).is_err());
        let a = random_bytes(32).unwrap();
        let b = random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pbkdf2_rejects_zero_iterations() {
        assert!(pbkdf2_derive(b"pw", b"salt", 0, 32).is_err());
        assert!(pbkdf2_derive(b"pw", b"salt", 1, 0).is_err());
    }

    #[test]
    fn test_pbkdf2_deterministic() {
        let a = pbkdf2_derive(b"pw", b"salt", 1000, 32).unwrap();
        let b = pbkdf2_derive(b"pw", b"salt", 1000, 32).unwrap();
        assert_eq!(a, b);
        let c = pbkdf2_derive(b"pw", b"other", 1000, 32).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_password_roundtrip() {
        let stored = hash_password("s3cret").unwrap();
        assert!(stored.starts_with("pbkdf2:100000:"));
        assert!(verify_password("s3cret", &stored));
        assert!(!verify_password("wrong", &stored));
    }

    #[test]
    fn test_password_hash_salted() {
        let a = hash_password("s3cret").unwrap();
        let b = hash_password("s3cret").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("s3cret", &a));
        assert!(verify_password("s3cret", &b));
    }

    #[test]
    fn test_verify_password_malformed_is_false() {
        assert!(!verify_password("pw", ""));
        assert!(!verify_password("pw", "pbkdf2:abc:00:00"));
        assert!(!verify_password("pw", "scrypt:1:00:00"));
        assert!(!verify_password("pw", "pbkdf2:0:00112233445566778899aabbccddeeff:00"));
    }

    #[test]
    fn test_auth_roundtrip() {
        let tag = auth(b"message", b"key").unwrap();
        assert!(auth_verify(&tag, b"message", b"key"));
        assert!(!auth_verify(&tag, b"message!", b"key"));
        assert!(!auth_verify(&tag, b"message", b"other key"));
    }

    #[test]
    fn test_ed25519_roundtrip() {
        let (pk, sk) = ed25519_keypair().unwrap();
        let sig = ed25519_sign(b"hull bundle", &sk);
        assert!(ed25519_verify(b"hull bundle", &sig, &pk));
        assert!(!ed25519_verify(b"other message", &sig, &pk));
    }

    #[test]
    fn test_ed25519_rejects_wrong_key() {
        let (_pk1, sk1) = ed25519_keypair().unwrap();
        let (pk2, _sk2) = ed25519_keypair().unwrap();
        let sig = ed25519_sign(b"msg", &sk1);
        assert!(!ed25519_verify(b"msg", &sig, &pk2));
    }

    #[test]
    fn test_ed25519_rejects_invalid_public_key() {
        // All 0xFF is not a valid curve point encoding.
        let sig = [0u8; 64];
        assert!(!ed25519_verify(b"msg", &sig, &[0xFF; 32]));
    }

    #[test]
    fn test_secretbox_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let nonce = random_bytes(NONCE_LEN).unwrap();
        let ct = secretbox(b"attack at dawn", &nonce, &key).unwrap();
        assert_eq!(ct.len(), b"attack at dawn".len() + TAG_LEN);
        let pt = secretbox_open(&ct, &nonce, &key).unwrap();
        assert_eq!(pt, b"attack at dawn");
    }

    #[test]
    fn test_secretbox_rejects_tamper() {
        let key = random_bytes(KEY_LEN).unwrap();
        let nonce = random_bytes(NONCE_LEN).unwrap();
        let mut ct = secretbox(b"payload", &nonce, &key).unwrap();
        ct[0] ^= 1;
        assert!(secretbox_open(&ct, &nonce, &key).is_err());
    }

    #[test]
    fn test_secretbox_size_checks() {
        assert!(secretbox(b"m", &[0u8; 23], &[0u8; 32]).is_err());
        assert!(secretbox(b"m", &[0u8; 24], &[0u8; 31]).is_err());
        assert!(secretbox_open(&[0u8; 8], &[0u8; 24], &[0u8; 32]).is_err());
    }

    #[test]
    fn test_box_roundtrip() {
        let (alice_pk, alice_sk) = box_keypair().unwrap();
        let (bob_pk, bob_sk) = box_keypair().unwrap();
        let nonce = random_bytes(NONCE_LEN).unwrap();

        let ct = box_seal(b"hello bob", &nonce, &bob_pk, &alice_sk).unwrap();
        let pt = box_open(&ct, &nonce, &alice_pk, &bob_sk).unwrap();
        assert_eq!(pt, b"hello bob");

        // A third party cannot open it.
        let (_eve_pk, eve_sk) = box_keypair().unwrap();
        assert!(box_open(&ct, &nonce, &alice_pk, &eve_sk).is_err());
    }
}
