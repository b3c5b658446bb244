//! Twofish block cipher with 256-bit keys
//!
//! 16-round Feistel network over four little-endian 32-bit words. Each round
//! feeds two words through the key-dependent `g` function (q-permutations,
//! S-box key words and the MDS matrix), combines them with a pseudo-Hadamard
//! transform and two round subkeys. Words 0..4 and 4..8 of the expanded key
//! whiten the block on the way in and out.
//!
//! The key schedule (40 subkeys plus four 256-entry S-box tables with the MDS
//! multiplication folded in) runs once in [`Twofish::new`]; block operations
//! only do table lookups.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::enclave::Key;
use crate::BLOCK_SIZE;

/// A 16-byte cipher block.
pub type Block = [u8; BLOCK_SIZE];

const ROUNDS: usize = 16;
const SUBKEYS: usize = 40;

/// Spacing of the h() inputs used to build subkey pairs
const RHO: u32 = 0x0101_0101;

/// x^8 + x^6 + x^5 + x^3 + 1
const MDS_POLY: u16 = 0x169;

/// x^8 + x^6 + x^3 + x^2 + 1
const RS_POLY: u16 = 0x14D;

const MDS: [[u8; 4]; 4] = [
    [0x01, 0xEF, 0x5B, 0x5B],
    [0x5B, 0xEF, 0xEF, 0x01],
    [0xEF, 0x5B, 0x01, 0xEF],
    [0xEF, 0x01, 0xEF, 0x5B],
];

const RS: [[u8; 8]; 4] = [
    [0x01, 0xA4, 0x55, 0x87, 0x5A, 0x58, 0xDB, 0x9E],
    [0xA4, 0x56, 0x82, 0xF3, 0x1E, 0xC6, 0x68, 0xE5],
    [0x02, 0xA1, 0xFC, 0xC1, 0x47, 0xAE, 0x3D, 0x19],
    [0xA4, 0x55, 0x87, 0x5A, 0x58, 0xDB, 0x9E, 0x03],
];

/// Fixed byte permutations q0 and q1.
const Q0: [u8; 256] = [
    0xA9, 0x67, 0xB3, 0xE8, 0x04, 0xFD, 0xA3, 0x76, 0x9A, 0x92, 0x80, 0x78, 0xE4, 0xDD, 0xD1, 0x38,
    0x0D, 0xC6, 0x35, 0x98, 0x18, 0xF7, 0xEC, 0x6C, 0x43, 0x75, 0x37, 0x26, 0xFA, 0x13, 0x94, 0x48,
    0xF2, 0xD0, 0x8B, 0x30, 0x84, 0x54, 0xDF, 0x23, 0x19, 0x5B, 0x3D, 0x59, 0xF3, 0xAE, 0xA2, 0x82,
    0x63, 0x01, 0x83, 0x2E, 0xD9, 0x51, 0x9B, 0x7C, 0xA6, 0xEB, 0xA5, 0xBE, 0x16, 0x0C, 0xE3, 0x61,
    0xC0, 0x8C, 0x3A, 0xF5, 0x73, 0x2C, 0x25, 0x0B, 0xBB, 0x4E, 0x89, 0x6B, 0x53, 0x6A, 0xB4, 0xF1,
    0xE1, 0xE6, 0xBD, 0x45, 0xE2, 0xF4, 0xB6, 0x66, 0xCC, 0x95, 0x03, 0x56, 0xD4, 0x1C, 0x1E, 0xD7,
    0xFB, 0xC3, 0x8E, 0xB5, 0xE9, 0xCF, 0xBF, 0xBA, 0xEA, 0x77, 0x39, 0xAF, 0x33, 0xC9, 0x62, 0x71,
    0x81, 0x79, 0x09, 0xAD, 0x24, 0xCD, 0xF9, 0xD8, 0xE5, 0xC5, 0xB9, 0x4D, 0x44, 0x08, 0x86, 0xE7,
    0xA1, 0x1D, 0xAA, 0xED, 0x06, 0x70, 0xB2, 0xD2, 0x41, 0x7B, 0xA0, 0x11, 0x31, 0xC2, 0x27, 0x90,
    0x20, 0xF6, 0x60, 0xFF, 0x96, 0x5C, 0xB1, 0xAB, 0x9E, 0x9C, 0x52, 0x1B, 0x5F, 0x93, 0x0A, 0xEF,
    0x91, 0x85, 0x49, 0xEE, 0x2D, 0x4F, 0x8F, 0x3B, 0x47, 0x87, 0x6D, 0x46, 0xD6, 0x3E, 0x69, 0x64,
    0x2A, 0xCE, 0xCB, 0x2F, 0xFC, 0x97, 0x05, 0x7A, 0xAC, 0x7F, 0xD5, 0x1A, 0x4B, 0x0E, 0xA7, 0x5A,
    0x28, 0x14, 0x3F, 0x29, 0x88, 0x3C, 0x4C, 0x02, 0xB8, 0xDA, 0xB0, 0x17, 0x55, 0x1F, 0x8A, 0x7D,
    0x57, 0xC7, 0x8D, 0x74, 0xB7, 0xC4, 0x9F, 0x72, 0x7E, 0x15, 0x22, 0x12, 0x58, 0x07, 0x99, 0x34,
    0x6E, 0x50, 0xDE, 0x68, 0x65, 0xBC, 0xDB, 0xF8, 0xC8, 0xA8, 0x2B, 0x40, 0xDC, 0xFE, 0x32, 0xA4,
    0xCA, 0x10, 0x21, 0xF0, 0xD3, 0x5D, 0x0F, 0x00, 0x6F, 0x9D, 0x36, 0x42, 0x4A, 0x5E, 0xC1, 0xE0,
];

const Q1: [u8; 256] = [
    0x75, 0xF3, 0xC6, 0xF4, 0xDB, 0x7B, 0xFB, 0xC8, 0x4A, 0xD3, 0xE6, 0x6B, 0x45, 0x7D, 0xE8, 0x4B,
    0xD6, 0x32, 0xD8, 0xFD, 0x37, 0x71, 0xF1, 0xE1, 0x30, 0x0F, 0xF8, 0x1B, 0x87, 0xFA, 0x06, 0x3F,
    0x5E, 0xBA, 0xAE, 0x5B, 0x8A, 0x00, 0xBC, 0x9D, 0x6D, 0xC1, 0xB1, 0x0E, 0x80, 0x5D, 0xD2, 0xD5,
    0xA0, 0x84, 0x07, 0x14, 0xB5, 0x90, 0x2C, 0xA3, 0xB2, 0x73, 0x4C, 0x54, 0x92, 0x74, 0x36, 0x51,
    0x38, 0xB0, 0xBD, 0x5A, 0xFC, 0x60, 0x62, 0x96, 0x6C, 0x42, 0xF7, 0x10, 0x7C, 0x28, 0x27, 0x8C,
    0x13, 0x95, 0x9C, 0xC7, 0x24, 0x46, 0x3B, 0x70, 0xCA, 0xE3, 0x85, 0xCB, 0x11, 0xD0, 0x93, 0xB8,
    0xA6, 0x83, 0x20, 0xFF, 0x9F, 0x77, 0xC3, 0xCC, 0x03, 0x6F, 0x08, 0xBF, 0x40, 0xE7, 0x2B, 0xE2,
    0x79, 0x0C, 0xAA, 0x82, 0x41, 0x3A, 0xEA, 0xB9, 0xE4, 0x9A, 0xA4, 0x97, 0x7E, 0xDA, 0x7A, 0x17,
    0x66, 0x94, 0xA1, 0x1D, 0x3D, 0xF0, 0xDE, 0xB3, 0x0B, 0x72, 0xA7, 0x1C, 0xEF, 0xD1, 0x53, 0x3E,
    0x8F, 0x33, 0x26, 0x5F, 0xEC, 0x76, 0x2A, 0x49, 0x81, 0x88, 0xEE, 0x21, 0xC4, 0x1A, 0xEB, 0xD9,
    0xC5, 0x39, 0x99, 0xCD, 0xAD, 0x31, 0x8B, 0x01, 0x18, 0x23, 0xDD, 0x1F, 0x4E, 0x2D, 0xF9, 0x48,
    0x4F, 0xF2, 0x65, 0x8E, 0x78, 0x5C, 0x58, 0x19, 0x8D, 0xE5, 0x98, 0x57, 0x67, 0x7F, 0x05, 0x64,
    0xAF, 0x63, 0xB6, 0xFE, 0xF5, 0xB7, 0x3C, 0xA5, 0xCE, 0xE9, 0x68, 0x44, 0xE0, 0x4D, 0x43, 0x69,
    0x29, 0x2E, 0xAC, 0x15, 0x59, 0xA8, 0x0A, 0x9E, 0x6E, 0x47, 0xDF, 0x34, 0x35, 0x6A, 0xCF, 0xDC,
    0x22, 0xC9, 0xC0, 0x9B, 0x89, 0xD4, 0xED, 0xAB, 0x12, 0xA2, 0x0D, 0x52, 0xBB, 0x02, 0x2F, 0xA9,
    0xD7, 0x61, 0x1E, 0xB4, 0x50, 0x04, 0xF6, 0xC2, 0x16, 0x25, 0x86, 0x56, 0x55, 0x09, 0xBE, 0x91,
];


/// q-permutations applied to each byte position of h(), innermost first:
/// the stages keyed by l3, l2, l1, l0, then the final permutation.
const Q_CHAIN: [[&[u8; 256]; 5]; 4] = [
    [&Q1, &Q1, &Q0, &Q0, &Q1],
    [&Q0, &Q1, &Q1, &Q0, &Q0],
    [&Q0, &Q0, &Q0, &Q1, &Q1],
    [&Q1, &Q0, &Q1, &Q1, &Q0],
];

/// Multiply in GF(2^8) modulo `poly`.
fn gf_mult(mut a: u8, b: u8, poly: u16) -> u8 {
    let mut b = b as u16;
    let mut product = 0u16;
    while a != 0 {
        if a & 1 != 0 {
            product ^= b;
        }
        a >>= 1;
        b <<= 1;
        if b & 0x100 != 0 {
            b ^= poly;
        }
    }
    product as u8
}

/// Column `col` of the MDS matrix times `x`, packed little-endian.
fn mds_column(x: u8, col: usize) -> u32 {
    (0..4).fold(0u32, |acc, row| {
        acc | (gf_mult(x, MDS[row][col], MDS_POLY) as u32) << (8 * row)
    })
}

/// Reed–Solomon encode eight key bytes into one S-box key word.
fn rs_encode(bytes: &[u8]) -> u32 {
    (0..4).fold(0u32, |acc, row| {
        let v = bytes
            .iter()
            .zip(RS[row].iter())
            .fold(0u8, |v, (&b, &r)| v ^ gf_mult(b, r, RS_POLY));
        acc | (v as u32) << (8 * row)
    })
}

/// The q-permutation chain of h() for byte position `pos`, keyed by `l`.
fn q_chain(pos: usize, x: u8, l: &[u32; 4]) -> u8 {
    let chain = &Q_CHAIN[pos];
    let mut y = x;
    for (stage, word) in l.iter().rev().enumerate() {
        y = chain[stage][y as usize] ^ (*word >> (8 * pos)) as u8;
    }
    chain[4][y as usize]
}

fn h(x: u32, l: &[u32; 4]) -> u32 {
    (0..4).fold(0u32, |acc, pos| {
        acc ^ mds_column(q_chain(pos, (x >> (8 * pos)) as u8, l), pos)
    })
}

fn load_words(block: &Block) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (word, bytes) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    words
}

fn store_words(block: &mut Block, words: [u32; 4]) {
    for (bytes, word) in block.chunks_exact_mut(4).zip(words) {
        bytes.copy_from_slice(&word.to_le_bytes());
    }
}

/// A keyed Twofish instance. Subkeys and S-boxes are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Twofish {
    k: [u32; SUBKEYS],
    s: [[u32; 256]; 4],
}

impl Twofish {
    /// Expand a 256-bit key into round subkeys and key-dependent S-boxes.
    pub fn new(key: &Key) -> Self {
        let bytes = key.as_bytes();

        let mut m = [0u32; 8];
        for (word, chunk) in m.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let mut even = [m[0], m[2], m[4], m[6]];
        let mut odd = [m[1], m[3], m[5], m[7]];

        // S-box key words are used in reverse order of derivation
        let mut sbox_key = [0u32; 4];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            sbox_key[3 - i] = rs_encode(chunk);
        }

        let mut k = [0u32; SUBKEYS];
        for i in 0..SUBKEYS / 2 {
            let a = h(RHO * (2 * i) as u32, &even);
            let b = h(RHO * (2 * i + 1) as u32, &odd).rotate_left(8);
            k[2 * i] = a.wrapping_add(b);
            k[2 * i + 1] = a.wrapping_add(b.wrapping_mul(2)).rotate_left(9);
        }

        let mut s = [[0u32; 256]; 4];
        for (pos, table) in s.iter_mut().enumerate() {
            for (x, entry) in table.iter_mut().enumerate() {
                *entry = mds_column(q_chain(pos, x as u8, &sbox_key), pos);
            }
        }

        m.zeroize();
        even.zeroize();
        odd.zeroize();
        sbox_key.zeroize();

        Self { k, s }
    }

    fn g(&self, x: u32) -> u32 {
        self.s[0][(x & 0xFF) as usize]
            ^ self.s[1][((x >> 8) & 0xFF) as usize]
            ^ self.s[2][((x >> 16) & 0xFF) as usize]
            ^ self.s[3][(x >> 24) as usize]
    }

    /// Round function F: returns the two PHT outputs with subkeys added.
    fn f(&self, r0: u32, r1: u32, round: usize) -> (u32, u32) {
        let t0 = self.g(r0);
        let t1 = self.g(r1.rotate_left(8));
        let f0 = t0.wrapping_add(t1).wrapping_add(self.k[2 * round + 8]);
        let f1 = t0
            .wrapping_add(t1.wrapping_mul(2))
            .wrapping_add(self.k[2 * round + 9]);
        (f0, f1)
    }

    /// Encrypt one block in place.
    pub fn encrypt_block(&self, block: &mut Block) {
        let p = load_words(block);
        let mut r = [
            p[0] ^ self.k[0],
            p[1] ^ self.k[1],
            p[2] ^ self.k[2],
            p[3] ^ self.k[3],
        ];

        for round in 0..ROUNDS {
            let (f0, f1) = self.f(r[0], r[1], round);
            r = [
                (r[2] ^ f0).rotate_right(1),
                r[3].rotate_left(1) ^ f1,
                r[0],
                r[1],
            ];
        }

        // Undo the last swap and apply output whitening
        store_words(
            block,
            [
                r[2] ^ self.k[4],
                r[3] ^ self.k[5],
                r[0] ^ self.k[6],
                r[1] ^ self.k[7],
            ],
        );
    }

    /// Decrypt one block in place.
    pub fn decrypt_block(&self, block: &mut Block) {
        let c = load_words(block);
        let mut r = [
            c[2] ^ self.k[6],
            c[3] ^ self.k[7],
            c[0] ^ self.k[4],
            c[1] ^ self.k[5],
        ];

        for round in (0..ROUNDS).rev() {
            let (f0, f1) = self.f(r[2], r[3], round);
            r = [
                r[2],
                r[3],
                r[0].rotate_left(1) ^ f0,
                (r[1] ^ f1).rotate_right(1),
            ];
        }

        store_words(
            block,
            [
                r[0] ^ self.k[0],
                r[1] ^ self.k[1],
                r[2] ^ self.k[2],
                r[3] ^ self.k[3],
            ],
        );
    }
}

impl std::fmt::Debug for Twofish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Twofish")
            .field("subkeys", &"[REDACTED]")
            .finish()
    }
}
