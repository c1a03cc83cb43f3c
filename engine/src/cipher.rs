//! Credential encryption.
//!
//! Credentials are sealed with AES-256-GCM under a versioned key ring. The
//! one-byte key id leads the frame so old blobs stay readable across key
//! rotations; new blobs always seal under the active key.
//!
//! Frame layout: `[key_id: 1][nonce: 12][ciphertext || tag]`.

use std::collections::HashMap;

use aes_gcm::{
	aead::{Aead, KeyInit},
	Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::providers::CredentialBundle;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
	#[error("invalid key material: {0}")]
	InvalidKey(String),
	#[error("unknown key id {0}")]
	UnknownKeyId(u8),
	#[error("ciphertext frame is too short")]
	TruncatedFrame,
	#[error("encryption failed")]
	EncryptionFailed,
	#[error("decryption failed")]
	DecryptionFailed,
	#[error("credential bundle cannot be encoded: {0}")]
	Codec(String),
}

/// Port used by command handlers. The engine treats both directions as
/// opaque; only adapters know the frame format.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialCipher: Send + Sync {
	async fn encrypt(&self, bundle: &CredentialBundle) -> Result<Vec<u8>, CipherError>;

	async fn decrypt(&self, ciphertext: &[u8]) -> Result<CredentialBundle, CipherError>;
}

pub struct KeyRingCipher {
	keys: HashMap<u8, Aes256Gcm>,
	active_key_id: u8,
}

impl KeyRingCipher {
	pub fn new(keys: Vec<(u8, [u8; KEY_LEN])>, active_key_id: u8) -> Result<Self, CipherError> {
		let keys: HashMap<u8, Aes256Gcm> = keys
			.into_iter()
			.map(|(id, material)| {
				let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material));
				(id, cipher)
			})
			.collect();
		if !keys.contains_key(&active_key_id) {
			return Err(CipherError::UnknownKeyId(active_key_id))
		}
		Ok(Self { keys, active_key_id })
	}

	/// Keys as `id:hex` pairs, the way they arrive from settings.
	pub fn from_hex_keys(keys: &[String], active_key_id: u8) -> Result<Self, CipherError> {
		let mut parsed = Vec::with_capacity(keys.len());
		for entry in keys {
			let (id, material) = entry
				.split_once(':')
				.ok_or_else(|| CipherError::InvalidKey(format!("expected id:hex, got {entry}")))?;
			let id: u8 =
				id.parse().map_err(|_| CipherError::InvalidKey(format!("bad key id {id}")))?;
			let mut bytes = [0u8; KEY_LEN];
			hex::decode_to_slice(material, &mut bytes)
				.map_err(|e| CipherError::InvalidKey(e.to_string()))?;
			parsed.push((id, bytes));
			bytes.zeroize();
		}
		Self::new(parsed, active_key_id)
	}
}

#[async_trait]
impl CredentialCipher for KeyRingCipher {
	async fn encrypt(&self, bundle: &CredentialBundle) -> Result<Vec<u8>, CipherError> {
		let cipher = self
			.keys
			.get(&self.active_key_id)
			.ok_or(CipherError::UnknownKeyId(self.active_key_id))?;

		let mut plaintext =
			serde_json::to_vec(bundle).map_err(|e| CipherError::Codec(e.to_string()))?;

		let mut nonce_bytes = [0u8; NONCE_LEN];
		rand::thread_rng().fill_bytes(&mut nonce_bytes);
		let sealed = cipher
			.encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
			.map_err(|_| CipherError::EncryptionFailed)?;
		plaintext.zeroize();

		let mut frame = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
		frame.push(self.active_key_id);
		frame.extend_from_slice(&nonce_bytes);
		frame.extend_from_slice(&sealed);
		Ok(frame)
	}

	async fn decrypt(&self, ciphertext: &[u8]) -> Result<CredentialBundle, CipherError> {
		if ciphertext.len() < 1 + NONCE_LEN {
			return Err(CipherError::TruncatedFrame)
		}
		let key_id = ciphertext[0];
		let cipher = self.keys.get(&key_id).ok_or(CipherError::UnknownKeyId(key_id))?;
		let (nonce, sealed) = ciphertext[1..].split_at(NONCE_LEN);

		let mut plaintext = cipher
			.decrypt(Nonce::from_slice(nonce), sealed)
			.map_err(|_| CipherError::DecryptionFailed)?;
		let bundle = serde_json::from_slice(&plaintext);
		plaintext.zeroize();
		bundle.map_err(|e| CipherError::Codec(e.to_string()))
	}
}
