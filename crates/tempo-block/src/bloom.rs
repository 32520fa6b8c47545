//! Partitioned bloom filter over `TraceID`, per spec.md §4.3: "partitioned
//! (k=6)", sized to achieve a false-positive rate of at most 1% for a given
//! trace count.
//!
//! Partitioning (one equal-sized bit array per hash function, rather than one
//! shared array) avoids the clustering a single shared array suffers under
//! skewed key distributions, at the cost of a slightly larger filter than the
//! theoretical optimum.

use xxhash_rust::xxh3::xxh3_64_with_seed;

pub const K: u32 = 6;

pub struct PartitionedBloom {
    k: u32,
    bits_per_partition: u64,
    // One partition per hash function, each a bit array stored as u64 words.
    partitions: Vec<Vec<u64>>,
}

impl PartitionedBloom {
    /// Sizes a filter for `count` keys to hit `target_fpr` per partition.
    pub fn new(count: usize, target_fpr: f64) -> Self {
        let count = count.max(1);
        // Standard bloom sizing for a single partition serving a 1/k share
        // of the false-positive budget per lookup across k partitions:
        // m = -(n * ln(p)) / (ln 2)^2.
        let m = (-(count as f64) * target_fpr.ln() / (std::f64::consts::LN_2.powi(2))).ceil();
        let bits_per_partition = ((m / K as f64).ceil() as u64).max(64);
        // Round up to a whole number of u64 words.
        let words = (bits_per_partition + 63) / 64;
        let bits_per_partition = words * 64;

        PartitionedBloom {
            k: K,
            bits_per_partition,
            partitions: (0..K).map(|_| vec![0u64; words as usize]).collect(),
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.k {
            let pos = self.bit_position(key, i);
            let word = (pos / 64) as usize;
            let bit = pos % 64;
            self.partitions[i as usize][word] |= 1u64 << bit;
        }
    }

    pub fn might_contain(&self, key: &[u8]) -> bool {
        for i in 0..self.k {
            let pos = self.bit_position(key, i);
            let word = (pos / 64) as usize;
            let bit = pos % 64;
            if self.partitions[i as usize][word] & (1u64 << bit) == 0 {
                return false;
            }
        }
        true
    }

    fn bit_position(&self, key: &[u8], partition: u32) -> u64 {
        // Double hashing (Kirsch-Mitzenmacher): derive k positions from two
        // independent hashes rather than computing k full hashes.
        let h1 = xxh3_64_with_seed(key, 0);
        let h2 = xxh3_64_with_seed(key, 1);
        h1.wrapping_add((partition as u64).wrapping_mul(h2)) % self.bits_per_partition
    }

    pub fn encode(&self) -> Vec<u8> {
        let words_per_partition = (self.bits_per_partition / 64) as usize;
        let mut out = Vec::with_capacity(12 + self.partitions.len() * words_per_partition * 8);
        out.extend_from_slice(&self.k.to_be_bytes());
        out.extend_from_slice(&self.bits_per_partition.to_be_bytes());
        for partition in &self.partitions {
            for word in partition {
                out.extend_from_slice(&word.to_be_bytes());
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, crate::Error> {
        if bytes.len() < 12 {
            return Err(crate::Error::Malformed("bloom filter: truncated header"));
        }
        let k = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let bits_per_partition = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
        let words_per_partition = (bits_per_partition / 64) as usize;

        let mut cursor = 12;
        let mut partitions = Vec::with_capacity(k as usize);
        for _ in 0..k {
            let mut words = Vec::with_capacity(words_per_partition);
            for _ in 0..words_per_partition {
                let word_bytes = bytes
                    .get(cursor..cursor + 8)
                    .ok_or(crate::Error::Malformed("bloom filter: truncated body"))?;
                words.push(u64::from_be_bytes(word_bytes.try_into().unwrap()));
                cursor += 8;
            }
            partitions.push(words);
        }

        Ok(PartitionedBloom {
            k,
            bits_per_partition,
            partitions,
        })
    }
}
