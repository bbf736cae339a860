//! Keeper signing identity: one secp256k1 key, EIP-155 legacy transactions.

use crate::abi::keccak256;
use crate::error::KeeperError;
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};

/// Unsigned legacy transaction (fixed gas price, no access list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u64,
    pub data: Vec<u8>,
}

pub struct Signer {
    key: SigningKey,
    address: [u8; 20],
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &format!("0x{}", hex::encode(self.address)))
            .finish()
    }
}

impl Signer {
    /// Load a 32-byte private key from hex (with or without `0x`).
    pub fn from_hex(s: &str) -> Result<Self, KeeperError> {
        let s = s.trim();
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| KeeperError::Config(format!("keeper key is not hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(KeeperError::Config(format!(
                "keeper key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| KeeperError::Config(format!("invalid keeper key: {e}")))?;
        let point = key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> [u8; 20] {
        self.address
    }

    /// RLP-encode and sign per EIP-155. Returns the raw transaction bytes
    /// for `eth_sendRawTransaction`.
    pub fn sign_legacy(&self, tx: &LegacyTx, chain_id: u64) -> Result<Vec<u8>, KeeperError> {
        let unsigned = rlp_encode_legacy(tx, chain_id, &[], &[]);
        let (signature, recovery_id) = self
            .key
            .sign_digest_recoverable(Keccak256::new_with_prefix(&unsigned))
            .map_err(|e| KeeperError::Submission(format!("sign failed: {e}")))?;

        let v = chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35))
            .and_then(|x| x.checked_add(u64::from(recovery_id.to_byte())))
            .ok_or_else(|| KeeperError::Submission("v overflow".into()))?;

        let sig_bytes = signature.to_bytes();
        let (r, s) = sig_bytes.split_at(32);
        let mut signed = RlpStream::new();
        signed.begin_list(9);
        append_fields(&mut signed, tx);
        signed.append(&v);
        signed.append(&trim_leading_zeros(r));
        signed.append(&trim_leading_zeros(s));
        Ok(signed.out().to_vec())
    }
}

/// `[nonce, gas_price, gas_limit, to, value, data, chain_id, r, s]`; the
/// unsigned payload uses empty `r` and `s`.
fn rlp_encode_legacy(tx: &LegacyTx, chain_id: u64, r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut stream = RlpStream::new();
    stream.begin_list(9);
    append_fields(&mut stream, tx);
    stream.append(&chain_id);
    stream.append(&r);
    stream.append(&s);
    stream.out().to_vec()
}

fn append_fields(stream: &mut RlpStream, tx: &LegacyTx) {
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    let to: &[u8] = &tx.to;
    stream.append(&to);
    stream.append(&tx.value);
    stream.append(&tx.data.as_slice());
}

/// Trim leading zero bytes for RLP integer encoding. Zero encodes as 0x80.
fn trim_leading_zeros(b: &[u8]) -> &[u8] {
    let first = b.iter().position(|x| *x != 0).unwrap_or(b.len());
    &b[first..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    /// Anvil default account 0.
    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_ADDRESS: &str = "f39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn tx() -> LegacyTx {
        LegacyTx {
            nonce: 3,
            gas_price: 101_000_000_000,
            gas_limit: 9_721_900,
            to: [0x5f; 20],
            value: 0,
            data: crate::abi::encode_call(crate::abi::DISTRIBUTE_REWARDS_SIG),
        }
    }

    #[test]
    fn derives_address() {
        let signer = Signer::from_hex(ANVIL_KEY).unwrap();
        assert_eq!(hex::encode(signer.address()), ANVIL_ADDRESS);
        assert!(!format!("{signer:?}").contains("ac0974"));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(Signer::from_hex("0x1234").is_err());
        assert!(Signer::from_hex("zz").is_err());
        assert!(Signer::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn signed_tx_recovers_to_sender() {
        let signer = Signer::from_hex(ANVIL_KEY).unwrap();
        let chain_id = 1_666_600_000u64;
        let raw = signer.sign_legacy(&tx(), chain_id).unwrap();

        let rlp = rlp::Rlp::new(&raw);
        assert_eq!(rlp.item_count().unwrap(), 9);
        assert_eq!(rlp.val_at::<u64>(0).unwrap(), 3);
        assert_eq!(rlp.val_at::<u64>(2).unwrap(), 9_721_900);
        let v: u64 = rlp.val_at(6).unwrap();
        let recid = v - chain_id * 2 - 35;
        assert!(recid <= 1);

        let r: Vec<u8> = rlp.val_at(7).unwrap();
        let s: Vec<u8> = rlp.val_at(8).unwrap();
        let mut rs = [0u8; 64];
        rs[32 - r.len()..32].copy_from_slice(&r);
        rs[64 - s.len()..].copy_from_slice(&s);
        let sig = Signature::from_slice(&rs).unwrap();

        let unsigned = rlp_encode_legacy(&tx(), chain_id, &[], &[]);
        let recovered = VerifyingKey::recover_from_digest(
            Keccak256::new_with_prefix(&unsigned),
            &sig,
            RecoveryId::from_byte(recid as u8).unwrap(),
        )
        .unwrap();
        let point = recovered.to_encoded_point(false);
        assert_eq!(hex::encode(&keccak256(&point.as_bytes()[1..])[12..]), ANVIL_ADDRESS);
    }

    #[test]
    fn trims_zeros() {
        assert_eq!(trim_leading_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert!(trim_leading_zeros(&[0, 0]).is_empty());
    }
}
