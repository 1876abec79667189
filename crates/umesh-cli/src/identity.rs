//! Local node identity: a persisted X25519 keypair used as the 3DH
//! long-term identity key (§4.7, C6).

use std::path::Path;

use umesh_crypto::x25519::PrivateKey;

/// Generate a fresh identity keypair and write the secret key, hex-encoded,
/// to `path`. Fails rather than overwriting an existing identity.
pub fn generate(path: &Path) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    if path.exists() {
        anyhow::bail!("identity file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let sk = PrivateKey::from_bytes(umesh_crypto::random::random_32()?);
    let pk = sk.public_key();

    std::fs::write(path, hex::encode(sk.to_bytes()))?;

    Ok((sk.to_bytes().to_vec(), pk.to_bytes().to_vec()))
}

/// Load the identity secret key from `path`, generating one on first use.
pub fn load_or_generate(path: &Path) -> anyhow::Result<([u8; 32], [u8; 32])> {
    let sk_bytes = if path.exists() {
        let text = std::fs::read_to_string(path)?;
        let bytes = hex::decode(text.trim())?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity file {} is not 32 bytes", path.display()))?;
        arr
    } else {
        let (sk, _pk) = generate(path)?;
        sk.try_into().map_err(|_| anyhow::anyhow!("generated identity key was not 32 bytes"))?
    };

    let sk = PrivateKey::from_bytes(sk_bytes);
    let pk = sk.public_key();
    Ok((sk.to_bytes(), pk.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_load_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.hex");

        let (sk, pk) = generate(&path).unwrap();
        let (loaded_sk, loaded_pk) = load_or_generate(&path).unwrap();

        assert_eq!(sk, loaded_sk.to_vec());
        assert_eq!(pk, loaded_pk.to_vec());
    }

    #[test]
    fn load_or_generate_creates_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.hex");
        assert!(!path.exists());

        load_or_generate(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.hex");
        generate(&path).unwrap();
        assert!(generate(&path).is_err());
    }
}
