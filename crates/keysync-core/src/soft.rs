//! Software crypto provider.
//!
//! Keys are an Ed25519 primary key (certification and signing) with an
//! X25519 sub-key for encryption. Secret material is sealed as one blob with
//! an Argon2id-derived key under ChaCha20-Poly1305. Messages use an
//! ephemeral X25519 agreement per recipient to wrap a random content key.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto::{
    CryptoProvider, DecryptedMessage, GenerateOptions, KeyStatus, ParsedKeys,
    SignatureVerification,
};
use crate::error::{CoreError, CryptoError, Result};
use crate::key::{
    Algorithm, Certification, Key, KeyMaterial, SealedSecret, SecretBytes, SecretKeys,
    SecretMaterial, SubKey, UserId,
};
use crate::types::{now_millis, Fingerprint, KeyId};

const ARMOR_BEGIN: &str = "-----BEGIN KEYSYNC ";
const ARMOR_END: &str = "-----END KEYSYNC ";
const ARMOR_TAIL: &str = "-----";
const ARMOR_PUBLIC: &str = "PUBLIC KEY BLOCK";
const ARMOR_PRIVATE: &str = "PRIVATE KEY BLOCK";
const ARMOR_LINE_WIDTH: usize = 64;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

/// Argon2id parameters for sealing secret material.
///
/// Stored alongside every sealed secret, so changing the defaults never
/// breaks existing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Insecure.
    pub const fn testing() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn derive(&self, passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = argon2::Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut output = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase, salt, &mut output[..])
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(output)
    }
}

#[derive(Serialize, Deserialize)]
struct SealedBlob {
    kdf: KdfParams,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct DetachedSignature {
    issuer: KeyId,
    created: i64,
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SignedContent {
    data: Vec<u8>,
    signature: Option<DetachedSignature>,
}

#[derive(Serialize, Deserialize)]
struct RecipientStanza {
    key_id: KeyId,
    ephemeral: Vec<u8>,
    nonce: Vec<u8>,
    wrapped_key: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    recipients: Vec<RecipientStanza>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Pure-software [`CryptoProvider`].
#[derive(Debug, Clone, Default)]
pub struct SoftCrypto {
    kdf: KdfParams,
}

impl SoftCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom KDF parameters for newly sealed secrets.
    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    fn seal(&self, fpr: &Fingerprint, keys: &SecretKeys, passphrase: &str) -> Result<SealedSecret> {
        let plaintext = Zeroizing::new(to_cbor(keys)?);
        let salt = random_bytes::<SALT_LEN>();
        let nonce = random_bytes::<NONCE_LEN>();
        let key = self.kdf.derive(passphrase.as_bytes(), &salt)?;
        let ciphertext = aead_seal(&key, &nonce, &plaintext, fpr.as_bytes())?;

        let blob = SealedBlob {
            kdf: self.kdf,
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        };
        Ok(SealedSecret {
            covers: keys.packets.keys().copied().collect(),
            data: to_cbor(&blob)?,
        })
    }

    fn open(&self, fpr: &Fingerprint, sealed: &SealedSecret, passphrase: &str) -> Result<SecretKeys> {
        let blob: SealedBlob = from_cbor(&sealed.data)?;
        let key = blob.kdf.derive(passphrase.as_bytes(), &blob.salt)?;
        let plaintext = Zeroizing::new(
            aead_open(&key, &blob.nonce, &blob.ciphertext, fpr.as_bytes())
                .map_err(|_| CryptoError::WrongPassphrase)?,
        );
        let keys: SecretKeys = from_cbor(&plaintext)?;

        let covers: Vec<Fingerprint> = keys.packets.keys().copied().collect();
        let mut expected = sealed.covers.clone();
        expected.sort();
        if covers != expected {
            return Err(CryptoError::Decryption(
                "sealed secret does not cover the advertised packets".into(),
            ));
        }
        Ok(keys)
    }

    fn detached(&self, data: &[u8], key: &Key) -> Result<DetachedSignature> {
        if key.is_public() {
            return Err(CryptoError::NoSigningKey(key.key_id()));
        }
        let seed = packet_secret(key, &key.fingerprint())?;
        let signing = SigningKey::from_bytes(&seed);
        let created = now_millis();
        let signature = signing.sign(&data_message(data, created));
        Ok(DetachedSignature {
            issuer: key.key_id(),
            created,
            signature: signature.to_bytes().to_vec(),
        })
    }

    fn check_detached(
        &self,
        data: &[u8],
        signature: &DetachedSignature,
        keys: &[Key],
    ) -> SignatureVerification {
        let valid = keys
            .iter()
            .find(|k| k.key_id() == signature.issuer)
            .map(|k| {
                verify_raw(
                    &k.primary.public,
                    &data_message(data, signature.created),
                    &signature.signature,
                )
            });
        SignatureVerification {
            key_id: signature.issuer,
            valid,
        }
    }

    /// Newest encryption sub-key whose binding signature verifies.
    fn bound_encryption_subkey<'a>(&self, key: &'a Key, now: i64) -> Option<&'a SubKey> {
        let fpr = key.fingerprint();
        key.subkeys
            .iter()
            .filter(|s| s.material.algorithm.can_encrypt() && !s.material.is_expired(now))
            .filter(|s| {
                s.binding.as_ref().is_some_and(|b| {
                    b.issuer == key.key_id()
                        && verify_raw(
                            &key.primary.public,
                            &binding_message(&fpr, &s.fingerprint(), b.created),
                            &b.signature,
                        )
                })
            })
            .max_by_key(|s| s.material.created)
    }

    fn decode_block(&self, label: &str, body: &str) -> Result<Key> {
        let bytes = hex::decode(body).map_err(|e| CryptoError::InvalidArmor(e.to_string()))?;
        let key: Key = from_cbor(&bytes)?;
        match (label, key.is_private()) {
            (ARMOR_PUBLIC, false) | (ARMOR_PRIVATE, true) => {}
            (ARMOR_PUBLIC, true) => {
                return Err(CryptoError::InvalidArmor(
                    "secret material in a public key block".into(),
                ))
            }
            (ARMOR_PRIVATE, false) => {
                return Err(CryptoError::InvalidArmor(
                    "private key block without secret material".into(),
                ))
            }
            (other, _) => {
                return Err(CryptoError::InvalidArmor(format!(
                    "unknown block type {:?}",
                    other
                )))
            }
        }
        key.validate_structure()?;
        Ok(key)
    }
}

#[async_trait]
impl CryptoProvider for SoftCrypto {
    fn read_armored(&self, armored: &str) -> ParsedKeys {
        let mut parsed = ParsedKeys::default();
        let mut current: Option<(String, String)> = None;

        for line in armored.lines().map(str::trim) {
            if let Some(label) = armor_label(line, ARMOR_BEGIN) {
                if current.is_some() {
                    parsed.errors.push("unterminated armor block".into());
                }
                current = Some((label.to_string(), String::new()));
            } else if let Some(label) = armor_label(line, ARMOR_END) {
                match current.take() {
                    Some((begin, body)) if begin == label => {
                        match self.decode_block(&begin, &body) {
                            Ok(key) => parsed.keys.push(key),
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping unreadable key block");
                                parsed.errors.push(e.to_string());
                            }
                        }
                    }
                    Some(_) => parsed.errors.push("mismatched armor footer".into()),
                    None => parsed.errors.push("armor footer without header".into()),
                }
            } else if let Some((_, body)) = current.as_mut() {
                body.push_str(line);
            }
        }

        if current.is_some() {
            parsed.errors.push("unterminated armor block".into());
        }
        if parsed.keys.is_empty() && parsed.errors.is_empty() {
            parsed.errors.push("no armored key block found".into());
        }
        parsed
    }

    fn armor(&self, key: &Key) -> Result<String> {
        let label = if key.is_private() {
            ARMOR_PRIVATE
        } else {
            ARMOR_PUBLIC
        };
        let body = hex::encode(to_cbor(key)?);

        let mut out = format!("{}{}{}\n", ARMOR_BEGIN, label, ARMOR_TAIL);
        for chunk in body.as_bytes().chunks(ARMOR_LINE_WIDTH) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
        out.push_str(&format!("{}{}{}\n", ARMOR_END, label, ARMOR_TAIL));
        Ok(out)
    }

    fn verify_primary_key(&self, key: &Key) -> KeyStatus {
        if key.primary.is_expired(now_millis()) {
            return KeyStatus::Expired;
        }
        if !key.primary.algorithm.can_sign() || key.primary.public.len() != 32 {
            return KeyStatus::Invalid;
        }

        let fpr = key.fingerprint();
        let issuer = key.key_id();
        let certified = key.users.iter().any(|user| {
            user.self_certifications.iter().any(|cert| {
                cert.issuer == issuer
                    && verify_raw(
                        &key.primary.public,
                        &certification_message(&fpr, &user.name, &user.email, cert.created),
                        &cert.signature,
                    )
            })
        });

        if certified {
            KeyStatus::Valid
        } else {
            KeyStatus::NoSelfCertification
        }
    }

    fn encryption_key_id(&self, key: &Key, now: i64) -> Option<KeyId> {
        self.bound_encryption_subkey(key, now).map(SubKey::key_id)
    }

    async fn generate_key_pair(&self, options: &GenerateOptions) -> Result<Key> {
        if options.user_ids.is_empty() {
            return Err(CryptoError::Generation(
                "at least one user id is required".into(),
            ));
        }
        if options.bits != 256 {
            tracing::debug!(bits = options.bits, "curve keys are always 256 bits");
        }

        let created = now_millis();
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let primary = KeyMaterial {
            algorithm: Algorithm::Ed25519,
            created,
            expires: options.expires_at,
            public: signing.verifying_key().to_bytes().to_vec(),
        };
        let fpr = primary.fingerprint();
        let issuer = fpr.key_id();

        let users = options
            .user_ids
            .iter()
            .map(|spec| {
                let message = certification_message(&fpr, &spec.name, &spec.email, created);
                let mut user = UserId::new(spec.name.clone(), spec.email.clone());
                user.self_certifications.push(Certification {
                    issuer,
                    created,
                    signature: signing.sign(&message).to_bytes().to_vec(),
                });
                user
            })
            .collect();

        let encryption = StaticSecret::from(random_bytes::<32>());
        let sub_material = KeyMaterial {
            algorithm: Algorithm::X25519,
            created,
            expires: options.expires_at,
            public: X25519PublicKey::from(&encryption).as_bytes().to_vec(),
        };
        let sub_fpr = sub_material.fingerprint();
        let binding = Certification {
            issuer,
            created,
            signature: signing
                .sign(&binding_message(&fpr, &sub_fpr, created))
                .to_bytes()
                .to_vec(),
        };

        let mut packets = BTreeMap::new();
        packets.insert(fpr, SecretBytes::new(signing.to_bytes().to_vec()));
        packets.insert(sub_fpr, SecretBytes::new(encryption.to_bytes().to_vec()));
        let keys = SecretKeys { packets };

        let secret = match options.passphrase.as_deref().filter(|p| !p.is_empty()) {
            Some(passphrase) => SecretMaterial::Encrypted(self.seal(&fpr, &keys, passphrase)?),
            None => SecretMaterial::Decrypted(keys),
        };

        tracing::debug!(key_id = %issuer, "generated key pair");

        Ok(Key {
            primary,
            users,
            subkeys: vec![SubKey {
                material: sub_material,
                binding: Some(binding),
            }],
            secret: Some(secret),
        })
    }

    async fn decrypt_key(&self, key: &Key, passphrase: &str) -> Result<Key> {
        let sealed = match &key.secret {
            None => {
                return Err(CryptoError::Decryption(format!(
                    "key {} has no secret material",
                    key.key_id()
                )))
            }
            Some(SecretMaterial::Decrypted(_)) => return Ok(key.clone()),
            Some(SecretMaterial::Encrypted(sealed)) => sealed,
        };

        let fpr = key.fingerprint();
        let keys = self.open(&fpr, sealed, passphrase)?;

        // The primary secret must belong to the public key it is attached to.
        let seed = keys
            .get(&fpr)
            .ok_or_else(|| CryptoError::Decryption("primary secret missing".into()))?;
        let seed = Zeroizing::new(to_array::<32>(seed.as_bytes())?);
        let derived = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        if derived.as_slice() != key.primary.public.as_slice() {
            return Err(CryptoError::Decryption(
                "secret material does not match the public key".into(),
            ));
        }

        let mut unlocked = key.clone();
        unlocked.secret = Some(SecretMaterial::Decrypted(keys));
        Ok(unlocked)
    }

    async fn encrypt(
        &self,
        data: &[u8],
        recipients: &[Key],
        signer: Option<&Key>,
    ) -> Result<Vec<u8>> {
        if recipients.is_empty() {
            return Err(CryptoError::Encryption("no recipients".into()));
        }

        let now = now_millis();
        let signature = signer.map(|k| self.detached(data, k)).transpose()?;
        let inner = Zeroizing::new(to_cbor(&SignedContent {
            data: data.to_vec(),
            signature,
        })?);

        let content_key = Zeroizing::new(random_bytes::<32>());
        let nonce = random_bytes::<NONCE_LEN>();
        let ciphertext = aead_seal(&content_key, &nonce, &inner, &[ENVELOPE_VERSION])?;

        let mut stanzas = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let sub = self
                .bound_encryption_subkey(recipient, now)
                .ok_or_else(|| CryptoError::NoEncryptionKey(recipient.key_id()))?;
            let recipient_public = X25519PublicKey::from(to_array::<32>(&sub.material.public)?);

            let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
            let ephemeral_public = X25519PublicKey::from(&ephemeral);
            let shared = ephemeral.diffie_hellman(&recipient_public);
            let wrap = wrap_key(shared.as_bytes(), &ephemeral_public, &recipient_public);

            let sub_id = sub.key_id();
            let wrap_nonce = random_bytes::<NONCE_LEN>();
            let wrapped_key = aead_seal(&wrap, &wrap_nonce, &content_key[..], sub_id.as_bytes())?;

            stanzas.push(RecipientStanza {
                key_id: sub_id,
                ephemeral: ephemeral_public.as_bytes().to_vec(),
                nonce: wrap_nonce.to_vec(),
                wrapped_key,
            });
        }

        to_cbor(&Envelope {
            version: ENVELOPE_VERSION,
            recipients: stanzas,
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    fn recipient_key_ids(&self, ciphertext: &[u8]) -> Result<Vec<KeyId>> {
        let envelope: Envelope = from_cbor(ciphertext)?;
        Ok(envelope.recipients.iter().map(|s| s.key_id).collect())
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        private_key: &Key,
        verifiers: &[Key],
    ) -> Result<DecryptedMessage> {
        let envelope: Envelope = from_cbor(ciphertext)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::Decryption(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }

        let (stanza, sub) = envelope
            .recipients
            .iter()
            .find_map(|s| {
                private_key
                    .subkeys
                    .iter()
                    .find(|k| k.key_id() == s.key_id)
                    .map(|k| (s, k))
            })
            .ok_or_else(|| CryptoError::NotARecipient(private_key.key_id()))?;

        let secret = StaticSecret::from(*packet_secret(private_key, &sub.fingerprint())?);
        let recipient_public = X25519PublicKey::from(&secret);
        let ephemeral_public = X25519PublicKey::from(to_array::<32>(&stanza.ephemeral)?);
        let shared = secret.diffie_hellman(&ephemeral_public);
        let wrap = wrap_key(shared.as_bytes(), &ephemeral_public, &recipient_public);

        let content_key = Zeroizing::new(to_array::<32>(&aead_open(
            &wrap,
            &stanza.nonce,
            &stanza.wrapped_key,
            stanza.key_id.as_bytes(),
        )?)?);
        let inner = Zeroizing::new(aead_open(
            &content_key,
            &envelope.nonce,
            &envelope.ciphertext,
            &[ENVELOPE_VERSION],
        )?);
        let content: SignedContent = from_cbor(&inner)?;

        let signatures = content
            .signature
            .iter()
            .map(|sig| self.check_detached(&content.data, sig, verifiers))
            .collect();

        Ok(DecryptedMessage {
            plaintext: content.data,
            signatures,
        })
    }

    async fn sign(&self, data: &[u8], key: &Key) -> Result<Vec<u8>> {
        to_cbor(&self.detached(data, key)?)
    }

    async fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        keys: &[Key],
    ) -> Result<Vec<SignatureVerification>> {
        let detached: DetachedSignature = ciborium::from_reader(signature)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ok(vec![self.check_detached(data, &detached, keys)])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn armor_label<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix(ARMOR_TAIL)
}

fn certification_message(primary: &Fingerprint, name: &str, email: &str, created: i64) -> Vec<u8> {
    let mut msg = b"keysync-certify-v1".to_vec();
    msg.extend_from_slice(primary.as_bytes());
    msg.extend_from_slice(&created.to_be_bytes());
    msg.extend_from_slice(&(name.len() as u64).to_be_bytes());
    msg.extend_from_slice(name.as_bytes());
    msg.extend_from_slice(email.to_ascii_lowercase().as_bytes());
    msg
}

fn binding_message(primary: &Fingerprint, sub: &Fingerprint, created: i64) -> Vec<u8> {
    let mut msg = b"keysync-bind-v1".to_vec();
    msg.extend_from_slice(primary.as_bytes());
    msg.extend_from_slice(sub.as_bytes());
    msg.extend_from_slice(&created.to_be_bytes());
    msg
}

fn data_message(data: &[u8], created: i64) -> Vec<u8> {
    let mut msg = b"keysync-sign-v1".to_vec();
    msg.extend_from_slice(&created.to_be_bytes());
    msg.extend_from_slice(data);
    msg
}

fn verify_raw(public: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public) = <[u8; 32]>::try_from(public) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&public) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying.verify(message, &signature).is_ok()
}

fn wrap_key(
    shared: &[u8; 32],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key("keysync-wrap-v1");
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}

/// Secret bytes of one packet of a decrypted key.
fn packet_secret(key: &Key, fpr: &Fingerprint) -> Result<Zeroizing<[u8; 32]>> {
    match &key.secret {
        None => Err(CryptoError::NoSigningKey(key.key_id())),
        Some(SecretMaterial::Encrypted(_)) => Err(CryptoError::KeyLocked(key.key_id())),
        Some(SecretMaterial::Decrypted(keys)) => {
            let bytes = keys.get(fpr).ok_or_else(|| {
                CryptoError::Decryption(format!("no secret material for packet {}", fpr))
            })?;
            Ok(Zeroizing::new(to_array::<32>(bytes.as_bytes())?))
        }
    }
}

fn aead_seal(key: &[u8; 32], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

fn aead_open(key: &[u8; 32], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::Decryption(format!(
            "nonce must be {} bytes",
            NONCE_LEN
        )));
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    <[u8; N]>::try_from(bytes).map_err(|_| {
        CryptoError::Decryption(format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?)
}
