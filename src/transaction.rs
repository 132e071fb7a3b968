//! Solana wire-format transaction codec.
//!
//! A transaction on the wire is a shortvec of 64-byte Ed25519 signatures
//! followed by the message those signatures cover:
//!
//! ```text
//! transaction = shortvec<signature[64]> message
//! message     = [version byte] header[3] shortvec<pubkey[32]> blockhash[32]
//!               shortvec<instruction> [shortvec<address-table-lookup>]
//! instruction = program_id_index(u8) shortvec<u8> shortvec<u8>
//! ```
//!
//! Legacy messages start directly with the header; a first byte with the high
//! bit set marks a versioned message, of which only version 0 exists. Version
//! 0 appends an address-lookup section after the instructions.
//!
//! `shortvec` is a base-128 varint length prefix followed by the elements.
//! Decoding is strict: varints must be minimal, lengths must fit the buffer,
//! account indices must resolve against the static keys, the signature count
//! must match the header, and no bytes may remain. Strictness makes
//! [`Transaction::serialize`] the exact inverse of [`Transaction::decode`],
//! which the settler relies on: placing the fee-payer signature must not
//! disturb any other byte of the client-signed payload.

use solana_pubkey::Pubkey;
use solana_signature::Signature;
use std::fmt;

use crate::util::b64;

pub const SIGNATURE_BYTES: usize = 64;
pub const PUBKEY_BYTES: usize = 32;
pub const BLOCKHASH_BYTES: usize = 32;

/// High bit of the first message byte distinguishes versioned from legacy.
const MESSAGE_VERSION_PREFIX: u8 = 0x80;

#[derive(Debug, thiserror::Error)]
pub enum TransactionDecodeError {
    #[error("Transaction is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unexpected end of transaction data")]
    UnexpectedEnd,
    #[error("Length prefix is not minimally encoded")]
    AliasedLength,
    #[error("Length prefix overflows the shortvec range")]
    LengthOverflow,
    #[error("Unsupported transaction version {0}")]
    UnsupportedVersion(u8),
    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),
    #[error("Signature count {count} disagrees with header requirement {required}")]
    SignatureCountMismatch { count: usize, required: usize },
    #[error("Header requires {required} signers but only {keys} account keys present")]
    TooFewAccountKeys { required: usize, keys: usize },
    #[error("Program id index {0} out of bounds")]
    ProgramIdIndexOutOfBounds(u8),
    #[error("Account index {0} out of bounds")]
    AccountIndexOutOfBounds(u8),
}

/// The signer attempting to co-sign is not among the required signers.
#[derive(Debug, thiserror::Error)]
#[error("Signer {0} is not among the required signers")]
pub struct UnknownSigner(pub Pubkey);

/// Layout descriptor for the flat `account_keys` list: the first
/// `num_required_signatures` keys are signers, key 0 is the fee payer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

/// A 32-byte recent blockhash binding the transaction to a time window of
/// roughly 150 slots. The facilitator never rewrites it: doing so would
/// invalidate the sender's signature.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Blockhash(pub [u8; BLOCKHASH_BYTES]);

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

/// One instruction, referencing the program and its accounts by index into
/// the message's `account_keys`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

impl CompiledInstruction {
    pub fn program_id<'a>(&self, account_keys: &'a [Pubkey]) -> &'a Pubkey {
        &account_keys[self.program_id_index as usize]
    }
}

/// A version-0 address-lookup-table reference. Parsed and re-emitted
/// verbatim; the looked-up addresses themselves are never resolved here, and
/// instruction indices must stay within the static account keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTableLookup {
    pub account_key: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionVersion {
    Legacy,
    V0,
}

/// The payload the signatures cover. Serializing it yields exactly the bytes
/// each signer signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: TransactionVersion,
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
    /// Only ever non-empty for version-0 messages.
    pub address_table_lookups: Vec<AddressTableLookup>,
}

impl Message {
    /// The signer keys: the leading `num_required_signatures` account keys.
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    /// The fee payer is always the first account key.
    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.account_keys.first()
    }

    /// Canonical message bytes: the exact range every signature covers.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        if self.version == TransactionVersion::V0 {
            out.push(MESSAGE_VERSION_PREFIX);
        }
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed_accounts);
        out.push(self.header.num_readonly_unsigned_accounts);
        write_shortvec_len(&mut out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_ref());
        }
        out.extend_from_slice(&self.recent_blockhash.0);
        write_shortvec_len(&mut out, self.instructions.len());
        for instruction in &self.instructions {
            out.push(instruction.program_id_index);
            write_shortvec_len(&mut out, instruction.accounts.len());
            out.extend_from_slice(&instruction.accounts);
            write_shortvec_len(&mut out, instruction.data.len());
            out.extend_from_slice(&instruction.data);
        }
        if self.version == TransactionVersion::V0 {
            write_shortvec_len(&mut out, self.address_table_lookups.len());
            for lookup in &self.address_table_lookups {
                out.extend_from_slice(lookup.account_key.as_ref());
                write_shortvec_len(&mut out, lookup.writable_indexes.len());
                out.extend_from_slice(&lookup.writable_indexes);
                write_shortvec_len(&mut out, lookup.readonly_indexes.len());
                out.extend_from_slice(&lookup.readonly_indexes);
            }
        }
        out
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, TransactionDecodeError> {
        let version = match cursor.peek_u8()? {
            byte if byte & MESSAGE_VERSION_PREFIX != 0 => {
                cursor.read_u8()?;
                match byte & !MESSAGE_VERSION_PREFIX {
                    0 => TransactionVersion::V0,
                    other => return Err(TransactionDecodeError::UnsupportedVersion(other)),
                }
            }
            _ => TransactionVersion::Legacy,
        };

        let header = MessageHeader {
            num_required_signatures: cursor.read_u8()?,
            num_readonly_signed_accounts: cursor.read_u8()?,
            num_readonly_unsigned_accounts: cursor.read_u8()?,
        };

        let key_count = cursor.read_shortvec_len()?;
        let mut account_keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let bytes: [u8; PUBKEY_BYTES] = cursor.read_array()?;
            account_keys.push(Pubkey::new_from_array(bytes));
        }

        let recent_blockhash = Blockhash(cursor.read_array()?);

        let instruction_count = cursor.read_shortvec_len()?;
        let mut instructions = Vec::with_capacity(instruction_count);
        for _ in 0..instruction_count {
            let program_id_index = cursor.read_u8()?;
            let account_count = cursor.read_shortvec_len()?;
            let accounts = cursor.read_bytes(account_count)?.to_vec();
            let data_count = cursor.read_shortvec_len()?;
            let data = cursor.read_bytes(data_count)?.to_vec();
            instructions.push(CompiledInstruction {
                program_id_index,
                accounts,
                data,
            });
        }

        let mut address_table_lookups = Vec::new();
        if version == TransactionVersion::V0 {
            let lookup_count = cursor.read_shortvec_len()?;
            for _ in 0..lookup_count {
                let bytes: [u8; PUBKEY_BYTES] = cursor.read_array()?;
                let writable_count = cursor.read_shortvec_len()?;
                let writable_indexes = cursor.read_bytes(writable_count)?.to_vec();
                let readonly_count = cursor.read_shortvec_len()?;
                let readonly_indexes = cursor.read_bytes(readonly_count)?.to_vec();
                address_table_lookups.push(AddressTableLookup {
                    account_key: Pubkey::new_from_array(bytes),
                    writable_indexes,
                    readonly_indexes,
                });
            }
        }

        let message = Message {
            version,
            header,
            account_keys,
            recent_blockhash,
            instructions,
            address_table_lookups,
        };
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), TransactionDecodeError> {
        let required = self.header.num_required_signatures as usize;
        let keys = self.account_keys.len();
        if required > keys {
            return Err(TransactionDecodeError::TooFewAccountKeys { required, keys });
        }
        for instruction in &self.instructions {
            if instruction.program_id_index as usize >= keys {
                return Err(TransactionDecodeError::ProgramIdIndexOutOfBounds(
                    instruction.program_id_index,
                ));
            }
            for &index in &instruction.accounts {
                if index as usize >= keys {
                    return Err(TransactionDecodeError::AccountIndexOutOfBounds(index));
                }
            }
        }
        Ok(())
    }
}

/// A complete transaction: one signature slot per required signer, each
/// either 64 zero bytes (absent) or an Ed25519 signature over the serialized
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    pub fn decode(bytes: &[u8]) -> Result<Self, TransactionDecodeError> {
        let mut cursor = Cursor::new(bytes);

        let signature_count = cursor.read_shortvec_len()?;
        let mut signatures = Vec::with_capacity(signature_count);
        for _ in 0..signature_count {
            let bytes: [u8; SIGNATURE_BYTES] = cursor.read_array()?;
            signatures.push(Signature::from(bytes));
        }

        let message = Message::decode(&mut cursor)?;

        let remaining = cursor.remaining();
        if remaining > 0 {
            return Err(TransactionDecodeError::TrailingBytes(remaining));
        }

        let required = message.header.num_required_signatures as usize;
        if signatures.len() != required {
            return Err(TransactionDecodeError::SignatureCountMismatch {
                count: signatures.len(),
                required,
            });
        }

        Ok(Transaction {
            signatures,
            message,
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, TransactionDecodeError> {
        let bytes = b64::decode(encoded)?;
        Self::decode(&bytes)
    }

    /// Full wire bytes. For a decoded transaction this reproduces the input
    /// exactly, apart from any signature slot updated since.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.signatures.len() * SIGNATURE_BYTES + 128);
        write_shortvec_len(&mut out, self.signatures.len());
        for signature in &self.signatures {
            out.extend_from_slice(signature.as_ref());
        }
        out.extend_from_slice(&self.message.serialize());
        out
    }

    pub fn to_base64(&self) -> String {
        b64::encode(self.serialize())
    }

    /// Canonical message bytes, the range every signature covers.
    pub fn message_bytes(&self) -> Vec<u8> {
        self.message.serialize()
    }

    /// Writes `signature` into the slot belonging to `signer`, leaving every
    /// other slot untouched. Returns the slot index.
    pub fn place_signature(
        &mut self,
        signer: &Pubkey,
        signature: Signature,
    ) -> Result<usize, UnknownSigner> {
        let position = self
            .message
            .signer_keys()
            .iter()
            .position(|key| key == signer)
            .ok_or(UnknownSigner(*signer))?;
        let required = self.message.header.num_required_signatures as usize;
        if self.signatures.len() < required {
            self.signatures.resize(required, Signature::default());
        }
        self.signatures[position] = signature;
        Ok(position)
    }

    /// True when every required signature slot holds a non-zero signature.
    /// Does not verify the signatures cryptographically.
    pub fn is_fully_signed(&self) -> bool {
        let required = self.message.header.num_required_signatures as usize;
        self.signatures.len() >= required
            && !self
                .signatures
                .iter()
                .any(|signature| *signature == Signature::default())
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek_u8(&self) -> Result<u8, TransactionDecodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(TransactionDecodeError::UnexpectedEnd)
    }

    fn read_u8(&mut self) -> Result<u8, TransactionDecodeError> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], TransactionDecodeError> {
        if count > self.remaining() {
            return Err(TransactionDecodeError::UnexpectedEnd);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TransactionDecodeError> {
        let slice = self.read_bytes(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    /// Base-128 varint length prefix, at most three bytes (16-bit range).
    /// Non-minimal encodings of the same value are rejected so that decoding
    /// and serializing are exact inverses.
    fn read_shortvec_len(&mut self) -> Result<usize, TransactionDecodeError> {
        let mut value: u32 = 0;
        for i in 0..3 {
            let byte = self.read_u8()?;
            if i > 0 && byte == 0 {
                return Err(TransactionDecodeError::AliasedLength);
            }
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                if value > u32::from(u16::MAX) {
                    return Err(TransactionDecodeError::LengthOverflow);
                }
                return Ok(value as usize);
            }
        }
        Err(TransactionDecodeError::LengthOverflow)
    }
}

fn write_shortvec_len(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Pubkey {
        Pubkey::new_from_array([byte; PUBKEY_BYTES])
    }

    fn sample_message(version: TransactionVersion) -> Message {
        Message {
            version,
            header: MessageHeader {
                num_required_signatures: 2,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![key(1), key(2), key(3), key(4)],
            recent_blockhash: Blockhash([9u8; BLOCKHASH_BYTES]),
            instructions: vec![
                CompiledInstruction {
                    program_id_index: 3,
                    accounts: vec![],
                    data: vec![2, 0x40, 0x0d, 3, 0],
                },
                CompiledInstruction {
                    program_id_index: 3,
                    accounts: vec![0, 1, 2],
                    data: vec![12, 16, 39, 0, 0, 0, 0, 0, 0, 6],
                },
            ],
            address_table_lookups: if version == TransactionVersion::V0 {
                vec![AddressTableLookup {
                    account_key: key(7),
                    writable_indexes: vec![0, 1],
                    readonly_indexes: vec![2],
                }]
            } else {
                Vec::new()
            },
        }
    }

    fn sample_transaction(version: TransactionVersion) -> Transaction {
        let message = sample_message(version);
        Transaction {
            signatures: vec![Signature::default(), Signature::from([5u8; 64])],
            message,
        }
    }

    #[test]
    fn test_legacy_round_trip() {
        let tx = sample_transaction(TransactionVersion::Legacy);
        let bytes = tx.serialize();
        let decoded = Transaction::decode(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn test_v0_round_trip() {
        let tx = sample_transaction(TransactionVersion::V0);
        let bytes = tx.serialize();
        let decoded = Transaction::decode(&bytes).unwrap();
        assert_eq!(decoded.message.version, TransactionVersion::V0);
        assert_eq!(decoded, tx);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn test_base64_round_trip() {
        let tx = sample_transaction(TransactionVersion::Legacy);
        let decoded = Transaction::from_base64(&tx.to_base64()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_message_bytes_are_the_serialized_suffix() {
        let tx = sample_transaction(TransactionVersion::Legacy);
        let wire = tx.serialize();
        let message = tx.message_bytes();
        assert_eq!(&wire[wire.len() - message.len()..], message.as_slice());
        // Two 64-byte slots behind a one-byte length prefix.
        assert_eq!(wire.len(), 1 + 2 * SIGNATURE_BYTES + message.len());
    }

    #[test]
    fn test_hand_assembled_wire_bytes() {
        // One signer, one no-account instruction, assembled byte by byte.
        let mut bytes = Vec::new();
        bytes.push(1); // signature count
        bytes.extend_from_slice(&[7u8; SIGNATURE_BYTES]);
        bytes.extend_from_slice(&[1, 0, 1]); // header
        bytes.push(2); // account key count
        bytes.extend_from_slice(&[0xaa; PUBKEY_BYTES]);
        bytes.extend_from_slice(&[0xbb; PUBKEY_BYTES]);
        bytes.extend_from_slice(&[0xcc; BLOCKHASH_BYTES]);
        bytes.push(1); // instruction count
        bytes.push(1); // program id index
        bytes.push(0); // no accounts
        bytes.extend_from_slice(&[2, 0xde, 0xad]); // 2 data bytes

        let tx = Transaction::decode(&bytes).unwrap();
        assert_eq!(tx.message.version, TransactionVersion::Legacy);
        assert_eq!(tx.signatures, vec![Signature::from([7u8; 64])]);
        assert_eq!(tx.message.header.num_required_signatures, 1);
        assert_eq!(tx.message.account_keys, vec![key(0xaa), key(0xbb)]);
        assert_eq!(tx.message.recent_blockhash, Blockhash([0xcc; 32]));
        assert_eq!(tx.message.instructions[0].data, vec![0xde, 0xad]);
        assert_eq!(tx.serialize(), bytes);
    }

    #[test]
    fn test_place_signature_touches_exactly_one_slot() {
        let mut tx = sample_transaction(TransactionVersion::Legacy);
        let before = tx.serialize();
        let position = tx.place_signature(&key(1), Signature::from([8u8; 64])).unwrap();
        assert_eq!(position, 0);
        let after = tx.serialize();
        assert_eq!(before.len(), after.len());
        let slot = 1 + position * SIGNATURE_BYTES;
        for (i, (a, b)) in before.iter().zip(after.iter()).enumerate() {
            if (slot..slot + SIGNATURE_BYTES).contains(&i) {
                assert_eq!(*b, 8);
            } else {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_place_signature_unknown_signer() {
        let mut tx = sample_transaction(TransactionVersion::Legacy);
        // key(3) is an account key but not a required signer
        assert!(tx.place_signature(&key(3), Signature::from([8u8; 64])).is_err());
    }

    #[test]
    fn test_is_fully_signed() {
        let mut tx = sample_transaction(TransactionVersion::Legacy);
        assert!(!tx.is_fully_signed());
        tx.place_signature(&key(1), Signature::from([8u8; 64])).unwrap();
        assert!(tx.is_fully_signed());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample_transaction(TransactionVersion::Legacy).serialize();
        bytes.push(0);
        assert!(matches!(
            Transaction::decode(&bytes),
            Err(TransactionDecodeError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = sample_transaction(TransactionVersion::Legacy).serialize();
        assert!(matches!(
            Transaction::decode(&bytes[..bytes.len() - 5]),
            Err(TransactionDecodeError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_shortvec_length_beyond_buffer_rejected() {
        // Claims 120 signatures but provides none.
        let bytes = vec![120u8];
        assert!(matches!(
            Transaction::decode(&bytes),
            Err(TransactionDecodeError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_aliased_shortvec_length_rejected() {
        // [0x82, 0x00] encodes 2 non-minimally.
        let mut bytes = sample_transaction(TransactionVersion::Legacy).serialize();
        assert_eq!(bytes[0], 2);
        bytes[0] = 0x82;
        bytes.insert(1, 0x00);
        assert!(matches!(
            Transaction::decode(&bytes),
            Err(TransactionDecodeError::AliasedLength)
        ));
    }

    #[test]
    fn test_signature_count_mismatch_rejected() {
        let tx = sample_transaction(TransactionVersion::Legacy);
        let mut short = tx.clone();
        short.signatures.truncate(1);
        assert!(matches!(
            Transaction::decode(&short.serialize()),
            Err(TransactionDecodeError::SignatureCountMismatch {
                count: 1,
                required: 2
            })
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut tx = sample_transaction(TransactionVersion::V0);
        tx.message.address_table_lookups.clear();
        let mut bytes = tx.serialize();
        let version_offset = 1 + 2 * SIGNATURE_BYTES;
        assert_eq!(bytes[version_offset], 0x80);
        bytes[version_offset] = 0x81;
        assert!(matches!(
            Transaction::decode(&bytes),
            Err(TransactionDecodeError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_program_id_index_out_of_bounds_rejected() {
        let mut tx = sample_transaction(TransactionVersion::Legacy);
        tx.message.instructions[0].program_id_index = 9;
        assert!(matches!(
            Transaction::decode(&tx.serialize()),
            Err(TransactionDecodeError::ProgramIdIndexOutOfBounds(9))
        ));
    }

    #[test]
    fn test_account_index_out_of_bounds_rejected() {
        let mut tx = sample_transaction(TransactionVersion::Legacy);
        tx.message.instructions[1].accounts.push(200);
        assert!(matches!(
            Transaction::decode(&tx.serialize()),
            Err(TransactionDecodeError::AccountIndexOutOfBounds(200))
        ));
    }

    #[test]
    fn test_too_few_account_keys_rejected() {
        let mut tx = sample_transaction(TransactionVersion::Legacy);
        tx.message.header.num_required_signatures = 5;
        tx.signatures = vec![Signature::default(); 5];
        assert!(matches!(
            Transaction::decode(&tx.serialize()),
            Err(TransactionDecodeError::TooFewAccountKeys { required: 5, keys: 4 })
        ));
    }

    #[test]
    fn test_not_base64_rejected() {
        assert!(matches!(
            Transaction::from_base64("definitely not base64!"),
            Err(TransactionDecodeError::Base64(_))
        ));
    }
}
