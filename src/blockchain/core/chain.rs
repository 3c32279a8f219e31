use crate::error::ChainError;
use crate::transaction::{Account, Tx};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex digits in a 32-byte digest; the upper bound for difficulty.
pub const MAX_DIFFICULTY: u32 = 64;

/// 32-byte SHA-256 digest, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, ChainError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| ChainError::SerializationError(format!("Invalid hex hash: {}", e)))?;
        Ok(Hash(bytes))
    }

    /// Number of leading zero hex digits.
    pub fn leading_zero_digits(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte >> 4 != 0 {
                return count;
            }
            count += 1;
            if byte & 0x0f != 0 {
                return count;
            }
            count += 1;
        }
        count
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Length-prefixed write so adjacent variable-size fields cannot alias.
pub(crate) fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// The proof-of-work predicate: the first `difficulty` hex digits of `hash` are zero.
pub fn is_block_hash_valid(hash: &Hash, difficulty: u32) -> bool {
    difficulty <= MAX_DIFFICULTY && hash.leading_zero_digits() >= difficulty
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent: Hash,
    pub number: u64,
    /// Unix timestamp in seconds.
    pub time: u64,
    pub miner: Account,
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(rename = "payload")]
    pub transactions: Vec<Tx>,
}

impl Block {
    pub fn new(
        parent: Hash,
        number: u64,
        time: u64,
        miner: Account,
        nonce: u32,
        transactions: Vec<Tx>,
    ) -> Self {
        Block {
            header: BlockHeader {
                parent,
                number,
                time,
                miner,
                nonce,
            },
            transactions,
        }
    }

    /// Digest over the header (nonce included) and every transaction hash.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(b"block");
        hasher.update(self.header.parent.as_bytes());
        hasher.update(self.header.number.to_le_bytes());
        hasher.update(self.header.time.to_le_bytes());
        write_field(&mut hasher, self.header.miner.as_str().as_bytes());
        hasher.update(self.header.nonce.to_le_bytes());
        hasher.update((self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.hash().as_bytes());
        }
        Hash(hasher.finalize().into())
    }
}

/// One line of the block log: the block keyed by its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash,
    pub block: Block,
}

impl BlockRecord {
    pub fn new(block: Block) -> Self {
        BlockRecord {
            hash: block.hash(),
            block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn hash_from_hex(s: &str) -> Hash {
        Hash::from_hex(s).unwrap()
    }

    #[test]
    fn test_valid_block_hash() {
        let hash = hash_from_hex("000000fa04f8160395c387277f8b2f14837603383d33809a4db586086168edfa");
        assert!(is_block_hash_valid(&hash, 6));
        assert!(is_block_hash_valid(&hash, 1));
    }

    #[test]
    fn test_invalid_block_hash() {
        let hash = hash_from_hex("000001fa04f8160395c387277f8b2f14837603383d33809a4db586086168edfa");
        assert!(!is_block_hash_valid(&hash, 6));
        assert!(is_block_hash_valid(&hash, 5));
    }

    #[test]
    fn test_difficulty_predicate_matches_hex_prefix() {
        let mut rng = rand::thread_rng();
        for _ in 0..2_000 {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            // Bias towards leading zero nibbles so the interesting cases get hit.
            let zero_nibbles = (rng.next_u32() % 8) as usize;
            for i in 0..zero_nibbles {
                if i % 2 == 0 {
                    bytes[i / 2] &= 0x0f;
                } else {
                    bytes[i / 2] &= 0xf0;
                }
            }
            let hash = Hash::from(bytes);
            let hex = hash.to_hex();

            for k in 0..=8u32 {
                let expected = hex.chars().take(k as usize).all(|c| c == '0');
                assert_eq!(is_block_hash_valid(&hash, k), expected, "hash {} k {}", hex, k);
            }
        }
    }

    #[test]
    fn test_zero_hash_meets_every_difficulty() {
        assert_eq!(Hash::ZERO.leading_zero_digits(), MAX_DIFFICULTY);
        assert!(is_block_hash_valid(&Hash::ZERO, MAX_DIFFICULTY));
        assert!(!is_block_hash_valid(&Hash::ZERO, MAX_DIFFICULTY + 1));
    }

    #[test]
    fn test_block_hash_covers_nonce() {
        let block = Block::new(Hash::ZERO, 0, 1, Account::from("jrhodes"), 0, vec![]);
        let mut other = block.clone();
        other.header.nonce = 1;
        assert_ne!(block.hash(), other.hash());
    }

    #[test]
    fn test_record_json_round_trip_preserves_hash() {
        let block = Block::new(
            Hash::from([7u8; 32]),
            3,
            1_600_000_000,
            Account::from("jrhodes"),
            42,
            vec![Tx::with_time("jrhodes", "meads", 1, "", 1_600_000_000)],
        );
        let record = BlockRecord::new(block);
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"payload\""));

        let decoded: BlockRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.hash, decoded.block.hash());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_hash_rejects_short_hex() {
        assert!(Hash::from_hex("00ff").is_err());
        assert!(serde_json::from_str::<Hash>("\"zz\"").is_err());
    }
}
