//! The signed-bundle protocol: `hull.sig` production, verification, and
//! inspection.
//!
//! The document is canonical JSON with a fixed field order; given the
//! same sources, manifest, and key material it is byte-identical. All
//! hashes, keys, and signatures are lowercase ASCII hex — no binary
//! framing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zeroize::Zeroize;

use hull_primitives::{crypto, Manifest};
use hull_runtime::{new_runtime, RuntimeConfig};

use crate::error::StartupError;
use crate::worker::find_entry;

/// Signature file name inside the application directory.
pub const SIG_FILE: &str = "hull.sig";

/// Current bundle format version.
pub const BUNDLE_VERSION: u32 = 1;

/// One hashed source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
}

/// The on-disk `hull.sig` record. Field order is the canonical order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureFile {
    pub version: u32,
    pub files: Vec<FileEntry>,
    pub manifest: Manifest,
    pub platform_hash: String,
    pub binary_hash: String,
    pub trampoline_hash: String,
    pub public_key: String,
    pub signature: String,
}

/// The byte string the Ed25519 signature covers: every field of the
/// record except the signature itself, in record order.
#[derive(Serialize)]
struct SigningPayload<'a> {
    version: u32,
    files: &'a [FileEntry],
    manifest: &'a Manifest,
    platform_hash: &'a str,
    binary_hash: &'a str,
    trampoline_hash: &'a str,
    public_key: &'a str,
}

fn signing_payload(record: &SignatureFile) -> Result<Vec<u8>, StartupError> {
    serde_json::to_vec(&SigningPayload {
        version: record.version,
        files: &record.files,
        manifest: &record.manifest,
        platform_hash: &record.platform_hash,
        binary_hash: &record.binary_hash,
        trampoline_hash: &record.trampoline_hash,
        public_key: &record.public_key,
    })
    .map_err(StartupError::fatal)
}

/// Enumerate the bundle's script sources in deterministic order.
pub fn enumerate_sources(app_dir: &Path) -> Result<Vec<FileEntry>, StartupError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(app_dir).sort_by_file_name() {
        let entry = entry.map_err(StartupError::fatal)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if !matches!(ext, "lua" | "js" | "mjs") {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(app_dir)
            .map_err(StartupError::fatal)?
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(entry.path())?;
        entries.push(FileEntry {
            path: rel,
            sha256: crypto::sha256_hex(&bytes),
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Load the application the same way `serve` does and return its
/// extracted manifest (canonical form).
pub fn load_manifest(app_dir: &Path) -> Result<Manifest, StartupError> {
    let entry = find_entry(app_dir)?;
    // Manifest extraction needs no durable storage.
    let config = RuntimeConfig::new(app_dir, entry, PathBuf::from(":memory:"));
    let mut host = new_runtime(config)?;
    host.load_app()?;
    Ok(host.extract_manifest()?)
}

fn read_secret_key(path: &Path) -> Result<[u8; 32], StartupError> {
    let mut text = std::fs::read_to_string(path)
        .map_err(|e| StartupError::fatal(format!("{}: {e}", path.display())))?;
    let mut bytes = hex::decode(text.trim())
        .map_err(|_| StartupError::fatal("secret key file is not hex"))?;
    text.zeroize();
    if bytes.len() != 32 {
        bytes.zeroize();
        return Err(StartupError::fatal("secret key must be 32 bytes of hex"));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

fn hash_file_opt(path: Option<&Path>) -> Result<String, StartupError> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .map_err(|e| StartupError::fatal(format!("{}: {e}", path.display())))?;
            Ok(crypto::sha256_hex(&bytes))
        }
        None => Ok(crypto::sha256_hex(b"")),
    }
}

/// Generate a developer keypair: `<prefix>.key` (secret, 0600) and
/// `<prefix>.pub`. Returns the two paths.
pub fn keygen(prefix: &Path) -> Result<(PathBuf, PathBuf), StartupError> {
    let (public, mut secret) = crypto::ed25519_keypair().map_err(StartupError::fatal)?;
    let key_path = prefix.with_extension("key");
    let pub_path = prefix.with_extension("pub");

    let mut secret_hex = hex::encode(secret);
    secret.zeroize();
    std::fs::write(&key_path, format!("{secret_hex}\n"))?;
    secret_hex.zeroize();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::write(&pub_path, format!("{}\n", hex::encode(public)))?;
    Ok((key_path, pub_path))
}

/// Produce a signed `hull.sig` for the application directory.
pub fn sign_bundle(
    app_dir: &Path,
    key_path: &Path,
    platform: Option<&Path>,
    binary: Option<&Path>,
    trampoline: Option<&Path>,
) -> Result<PathBuf, StartupError> {
    let mut secret = read_secret_key(key_path)?;
    let public_key = hex::encode(crypto::ed25519_public_key(&secret));

    let mut record = SignatureFile {
        version: BUNDLE_VERSION,
        files: enumerate_sources(app_dir)?,
        manifest: load_manifest(app_dir)?,
        platform_hash: hash_file_opt(platform)?,
        binary_hash: hash_file_opt(binary)?,
        trampoline_hash: hash_file_opt(trampoline)?,
        public_key,
        signature: String::new(),
    };

    let payload = signing_payload(&record)?;
    record.signature = hex::encode(crypto::ed25519_sign(&payload, &secret));
    secret.zeroize();

    let out_path = app_dir.join(SIG_FILE);
    let text = serde_json::to_string(&record).map_err(StartupError::fatal)?;
    std::fs::write(&out_path, text)?;
    Ok(out_path)
}

/// Verify `hull.sig` against the sources on disk and an expected
/// developer public key. Every refusal happens before any interpreter
/// exists.
pub fn verify_bundle(app_dir: &Path, expected_pubkey: &str) -> Result<SignatureFile, StartupError> {
    let sig_path = app_dir.join(SIG_FILE);
    let text = std::fs::read_to_string(&sig_path)
        .map_err(|e| StartupError::sig(format!("{}: {e}", sig_path.display())))?;
    let record: SignatureFile =
        serde_json::from_str(&text).map_err(|e| StartupError::sig(format!("bad {SIG_FILE}: {e}")))?;

    // 1. The declared key must be exactly the key the operator passed.
    if !record
        .public_key
        .eq_ignore_ascii_case(expected_pubkey.trim())
    {
        return Err(StartupError::sig(
            "declared public key does not match --verify-sig",
        ));
    }

    // 2. Every listed source must hash to its recorded digest.
    for file in &record.files {
        if file.path.starts_with('/') || file.path.split('/').any(|seg| seg == "..") {
            return Err(StartupError::sig(format!(
                "listed path {:?} escapes the bundle",
                file.path
            )));
        }
        let bytes = std::fs::read(app_dir.join(&file.path))
            .map_err(|e| StartupError::sig(format!("{}: {e}", file.path)))?;
        if crypto::sha256_hex(&bytes) != file.sha256.to_ascii_lowercase() {
            return Err(StartupError::sig(format!("hash mismatch for {}", file.path)));
        }
    }

    // 3. The signature must cover the canonical serialization.
    let payload = signing_payload(&record)?;
    let public: [u8; 32] = hex::decode(&record.public_key)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| StartupError::sig("bad public key hex"))?;
    let signature: [u8; 64] = hex::decode(&record.signature)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| StartupError::sig("bad signature hex"))?;
    if !crypto::ed25519_verify(&payload, &signature, &public) {
        return Err(StartupError::sig("signature does not verify"));
    }

    Ok(record)
}

/// Human-readable rendering of `hull.sig`.
pub fn inspect_bundle(app_dir: &Path) -> Result<String, StartupError> {
    let sig_path = app_dir.join(SIG_FILE);
    let text = std::fs::read_to_string(&sig_path)
        .map_err(|e| StartupError::fatal(format!("{}: {e}", sig_path.display())))?;
    let record: SignatureFile = serde_json::from_str(&text)
        .map_err(|e| StartupError::fatal(format!("bad {SIG_FILE}: {e}")))?;

    let mut out = String::new();
    out.push_str(&format!("version:    {}\n", record.version));
    out.push_str(&format!("public key: {}\n", record.public_key));
    out.push_str(&format!("signature:  {}\n", record.signature));
    out.push_str(&format!("platform:   {}\n", record.platform_hash));
    out.push_str(&format!("binary:     {}\n", record.binary_hash));
    out.push_str(&format!("trampoline: {}\n", record.trampoline_hash));
    out.push_str(&format!("files ({}):\n", record.files.len()));
    for file in &record.files {
        out.push_str(&format!("  {}  {}\n", file.sha256, file.path));
    }
    out.push_str("manifest:\n");
    let manifest =
        serde_json::to_string_pretty(&record.manifest).map_err(StartupError::fatal)?;
    for line in manifest.lines() {
        out.push_str(&format!("  {line}\n"));
    }
    Ok(out)
}
