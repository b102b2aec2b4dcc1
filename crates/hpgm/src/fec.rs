// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reed–Solomon erasure coding over GF(2⁸).
//!
//! Forward error correction for transmission groups: `k` original
//! packets are extended with up to `n - k` parity packets, and any `k`
//! of the `n` reconstruct the originals. The window calls
//! [`ReedSolomon::decode_parity_appended`] once per recoverable group;
//! the encoder half exists for senders and for fabricating parity in
//! tests.
//!
//! # Construction
//!
//! The generator is a systematic `n x k` matrix derived from a
//! Vandermonde matrix on the nodes `alpha^0 .. alpha^(n-1)`: multiplying
//! by the inverse of its top `k x k` block turns the top rows into the
//! identity, so data packets are transmitted unmodified and each parity
//! row is an independent linear combination.
//!
//! # Appended layout
//!
//! Blocks are passed in the *appended* layout the window uses: positions
//! `0..k` hold original data (or zeroed buffers for missing packets) and
//! parity packets are appended from position `k` upward, in generator
//! row order. `offsets[j]` names the generator row whose bytes stand in
//! for position `j`; `offsets[j] == j` means the original packet is
//! present.
//!
//! Pure functions: no retries, no internal state beyond the tables.

/// GF(2⁸) reduction polynomial x⁸+x⁴+x³+x²+1.
const GF_GENERATOR: u16 = 0x11d;

/// Maximum block count (field size minus the zero element).
pub const GF_MAX: usize = 255;

const fn build_tables() -> ([u8; 256], [u8; 512]) {
    let mut log = [0u8; 256];
    let mut alog = [0u8; 512];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        alog[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= GF_GENERATOR;
        }
        i += 1;
    }
    // duplicate the exponent table so log[a] + log[b] needs no reduction
    let mut j = 255;
    while j < 512 {
        alog[j] = alog[j - 255];
        j += 1;
    }
    (log, alog)
}

const TABLES: ([u8; 256], [u8; 512]) = build_tables();
const GF_LOG: [u8; 256] = TABLES.0;
const GF_ALOG: [u8; 512] = TABLES.1;

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF_ALOG[GF_LOG[a as usize] as usize + GF_LOG[b as usize] as usize]
}

#[inline]
fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0, "division by zero in GF(2^8)");
    if a == 0 {
        return 0;
    }
    GF_ALOG[255 + GF_LOG[a as usize] as usize - GF_LOG[b as usize] as usize]
}

/// `dst ^= c * src`, byte-wise.
fn gf_addmul(dst: &mut [u8], src: &[u8], c: u8) {
    if c == 0 {
        return;
    }
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= gf_mul(c, *s);
    }
}

/// Invert a `k x k` matrix in place (Gauss–Jordan). The matrix must be
/// invertible; the systematic construction guarantees it for every
/// erasure pattern.
fn gf_matrix_invert(m: &mut [u8], k: usize) {
    let mut inv = vec![0u8; k * k];
    for i in 0..k {
        inv[i * k + i] = 1;
    }

    for col in 0..k {
        // find a non-zero pivot in this column
        let pivot = (col..k)
            .find(|&r| m[r * k + col] != 0)
            .expect("singular matrix in erasure decode");
        if pivot != col {
            for j in 0..k {
                m.swap(pivot * k + j, col * k + j);
                inv.swap(pivot * k + j, col * k + j);
            }
        }

        // normalise the pivot row
        let p = m[col * k + col];
        for j in 0..k {
            m[col * k + j] = gf_div(m[col * k + j], p);
            inv[col * k + j] = gf_div(inv[col * k + j], p);
        }

        // eliminate the column from every other row
        for r in 0..k {
            if r == col {
                continue;
            }
            let c = m[r * k + col];
            if c == 0 {
                continue;
            }
            for j in 0..k {
                let a = gf_mul(c, m[col * k + j]);
                m[r * k + j] ^= a;
                let b = gf_mul(c, inv[col * k + j]);
                inv[r * k + j] ^= b;
            }
        }
    }

    m.copy_from_slice(&inv);
}

/// Systematic Reed–Solomon erasure codec for an `(n, k)` transmission
/// group geometry.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    n: usize,
    k: usize,
    /// `n x k` generator matrix, row-major; top `k x k` is the identity.
    gm: Vec<u8>,
}

impl ReedSolomon {
    /// Build the `(n, k)` codec.
    ///
    /// # Panics
    ///
    /// When `k == 0`, `k > n`, or `n > 255`.
    #[must_use]
    pub fn new(n: usize, k: usize) -> Self {
        assert!(k > 0 && k <= n && n <= GF_MAX, "invalid RS geometry");

        // Vandermonde on distinct nodes alpha^i
        let mut vm = vec![0u8; n * k];
        for (i, row) in vm.chunks_exact_mut(k).enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = GF_ALOG[(i * j) % 255];
            }
        }

        // top k x k block, inverted
        let mut top = vm[..k * k].to_vec();
        gf_matrix_invert(&mut top, k);

        // gm = vm * inv(top); top k rows collapse to the identity
        let mut gm = vec![0u8; n * k];
        for i in 0..n {
            for j in 0..k {
                let mut acc = 0u8;
                for t in 0..k {
                    acc ^= gf_mul(vm[i * k + t], top[t * k + j]);
                }
                gm[i * k + j] = acc;
            }
        }

        Self { n, k, gm }
    }

    /// Group geometry `n`.
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Group geometry `k`.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Compute parity block `h` (`0 <= h < n - k`) over `k` equal-length
    /// data blocks.
    ///
    /// # Panics
    ///
    /// When `h` is out of range, `data.len() != k`, or lengths differ.
    #[must_use]
    pub fn encode_parity(&self, data: &[&[u8]], h: usize) -> Vec<u8> {
        assert_eq!(data.len(), self.k, "encode needs exactly k data blocks");
        assert!(h < self.n - self.k, "parity index out of range");
        let len = data[0].len();
        assert!(
            data.iter().all(|d| d.len() == len),
            "data blocks must share one length"
        );

        let row = &self.gm[(self.k + h) * self.k..(self.k + h + 1) * self.k];
        let mut parity = vec![0u8; len];
        for (j, block) in data.iter().enumerate() {
            gf_addmul(&mut parity, block, row[j]);
        }
        parity
    }

    /// Reconstruct missing data blocks in place.
    ///
    /// `blocks` uses the appended layout (see module docs); every block
    /// shares one length and positions to be recovered hold zeroed
    /// buffers. `offsets` has `k` entries naming the generator row
    /// standing in for each data position.
    pub fn decode_parity_appended(&self, blocks: &mut [Vec<u8>], offsets: &[usize]) {
        let k = self.k;
        debug_assert_eq!(offsets.len(), k, "offsets must cover k positions");
        debug_assert!(
            offsets.iter().all(|&o| o < self.n),
            "offset outside generator"
        );

        if offsets.iter().enumerate().all(|(j, &o)| o == j) {
            return; // nothing missing
        }

        // decoding matrix: one generator row per surviving block
        let mut w = vec![0u8; k * k];
        for (i, &off) in offsets.iter().enumerate() {
            w[i * k..(i + 1) * k].copy_from_slice(&self.gm[off * k..(off + 1) * k]);
        }
        gf_matrix_invert(&mut w, k);

        for j in 0..k {
            if offsets[j] == j {
                continue;
            }
            let len = blocks[offsets[j]].len();
            let mut out = vec![0u8; len];
            for (i, &off) in offsets.iter().enumerate() {
                gf_addmul(&mut out, &blocks[off], w[j * k + i]);
            }
            blocks[j] = out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gf_mul_identities() {
        for a in 0..=255u8 {
            assert_eq!(gf_mul(a, 1), a, "1 is the multiplicative identity");
            assert_eq!(gf_mul(a, 0), 0);
        }
    }

    #[test]
    fn test_gf_div_inverts_mul() {
        for a in 1..=255u8 {
            for b in [1u8, 2, 3, 29, 76, 143, 255] {
                assert_eq!(gf_div(gf_mul(a, b), b), a);
            }
        }
    }

    #[test]
    fn test_gf_mul_distributive() {
        for a in [3u8, 87, 200] {
            for b in [5u8, 99, 254] {
                for c in [7u8, 131] {
                    assert_eq!(gf_mul(a, b ^ c), gf_mul(a, b) ^ gf_mul(a, c));
                }
            }
        }
    }

    #[test]
    fn test_generator_is_systematic() {
        let rs = ReedSolomon::new(6, 4);
        for i in 0..4 {
            for j in 0..4 {
                let expected = u8::from(i == j);
                assert_eq!(
                    rs.gm[i * 4 + j],
                    expected,
                    "top k x k block must be the identity"
                );
            }
        }
    }

    #[test]
    fn test_matrix_invert_roundtrip() {
        let k = 3;
        let m = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 10];
        let mut inv = m.clone();
        gf_matrix_invert(&mut inv, k);

        // m * inv == identity
        for i in 0..k {
            for j in 0..k {
                let mut acc = 0u8;
                for t in 0..k {
                    acc ^= gf_mul(m[i * k + t], inv[t * k + j]);
                }
                assert_eq!(acc, u8::from(i == j));
            }
        }
    }

    fn test_blocks(k: usize, len: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|j| (0..len).map(|b| (j * 37 + b * 11 + 5) as u8).collect())
            .collect()
    }

    #[test]
    fn test_single_parity_recovers_one_loss() {
        let rs = ReedSolomon::new(5, 4);
        let data = test_blocks(4, 16);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let parity = rs.encode_parity(&refs, 0);

        for missing in 0..4 {
            let mut blocks: Vec<Vec<u8>> = data.clone();
            blocks[missing] = vec![0; 16];
            blocks.push(parity.clone()); // appended at position k
            let offsets: Vec<usize> = (0..4).map(|j| if j == missing { 4 } else { j }).collect();

            rs.decode_parity_appended(&mut blocks, &offsets);
            assert_eq!(
                blocks[missing], data[missing],
                "position {missing} must be reconstructed"
            );
        }
    }

    #[test]
    fn test_two_parity_recover_two_losses() {
        let rs = ReedSolomon::new(6, 4);
        let data = test_blocks(4, 32);
        let refs: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        let p0 = rs.encode_parity(&refs, 0);
        let p1 = rs.encode_parity(&refs, 1);

        let mut blocks = data.clone();
        blocks[1] = vec![0; 32];
        blocks[3] = vec![0; 32];
        blocks.push(p0);
        blocks.push(p1);
        let offsets = vec![0, 4, 2, 5];

        rs.decode_parity_appended(&mut blocks, &offsets);
        assert_eq!(blocks[1], data[1]);
        assert_eq!(blocks[3], data[3]);
    }

    #[test]
    fn test_decode_no_losses_is_noop() {
        let rs = ReedSolomon::new(5, 4);
        let mut blocks = test_blocks(4, 8);
        let before = blocks.clone();
        rs.decode_parity_appended(&mut blocks, &[0, 1, 2, 3]);
        assert_eq!(blocks, before);
    }

    #[test]
    #[should_panic(expected = "invalid RS geometry")]
    fn test_invalid_geometry_rejected() {
        let _rs = ReedSolomon::new(4, 5);
    }
}
