//! secp256k1 key and peer-id conversions.
//!
//! The host supplies one raw secp256k1 private key which backs two identities:
//! the libp2p host keypair and the discv5 ENR signing key. Discovered ENRs go
//! the other way: their secp256k1 public key becomes a libp2p `PeerId`.

use discv5::enr::{CombinedKey, CombinedPublicKey, EnrPublicKey};
use discv5::Enr;
use libp2p::identity;
use libp2p::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid secp256k1 private key: {0}")]
    InvalidPrivateKey(String),

    #[error("keypair is not secp256k1")]
    NotSecp256k1,
}

/// Build the libp2p host keypair from raw secp256k1 private key bytes.
pub fn libp2p_keypair_from_secret(raw: &[u8]) -> Result<identity::Keypair, KeyError> {
    let mut bytes = raw.to_vec();
    let secret = identity::secp256k1::SecretKey::try_from_bytes(&mut bytes)
        .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
    Ok(identity::secp256k1::Keypair::from(secret).into())
}

/// Convert the libp2p host keypair into a discv5 ENR signing key. Both sides
/// must be backed by the same secp256k1 secret so the ENR's public key maps
/// back to the host's peer id.
pub fn discv5_key_from_keypair(keypair: &identity::Keypair) -> Result<CombinedKey, KeyError> {
    let secp = keypair
        .clone()
        .try_into_secp256k1()
        .map_err(|_| KeyError::NotSecp256k1)?;
    let mut raw = secp.secret().to_bytes();
    CombinedKey::secp256k1_from_bytes(&mut raw)
        .map_err(|e| KeyError::InvalidPrivateKey(format!("{e:?}")))
}

/// Derive the libp2p peer id from an ENR's secp256k1 public key. Returns
/// `None` for records signed with a non-secp256k1 scheme.
pub fn peer_id_from_enr(enr: &Enr) -> Option<PeerId> {
    let CombinedPublicKey::Secp256k1(public_key) = enr.public_key() else {
        return None;
    };
    let public_key = identity::secp256k1::PublicKey::try_from_bytes(&public_key.encode()).ok()?;
    Some(identity::PublicKey::from(public_key).to_peer_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret() -> [u8; 32] {
        let mut raw = [7u8; 32];
        raw[0] = 1;
        raw
    }

    #[test]
    fn keypair_from_secret_is_deterministic() {
        let a = libp2p_keypair_from_secret(&test_secret()).unwrap();
        let b = libp2p_keypair_from_secret(&test_secret()).unwrap();
        assert_eq!(a.public().to_peer_id(), b.public().to_peer_id());
    }

    #[test]
    fn rejects_short_private_key() {
        assert!(libp2p_keypair_from_secret(&[1, 2, 3]).is_err());
    }

    #[test]
    fn rejects_non_secp256k1_keypair() {
        let ed25519 = identity::Keypair::generate_ed25519();
        assert!(matches!(
            discv5_key_from_keypair(&ed25519),
            Err(KeyError::NotSecp256k1)
        ));
    }

    #[test]
    fn enr_public_key_maps_back_to_the_host_peer_id() {
        let keypair = libp2p_keypair_from_secret(&test_secret()).unwrap();
        let enr_key = discv5_key_from_keypair(&keypair).unwrap();
        let enr = Enr::builder().build(&enr_key).unwrap();

        let from_enr = peer_id_from_enr(&enr).unwrap();
        assert_eq!(from_enr, keypair.public().to_peer_id());
    }
}
