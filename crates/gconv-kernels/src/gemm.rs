//! Tiled f32 matrix multiplication.
//!
//! Cache-friendly blocking with rayon parallelism across row tiles once the
//! problem is large enough to amortize the fork.

use rayon::prelude::*;

/// Tile size for cache-friendly blocking.
/// 64x64 f32 tiles fit comfortably in L1.
const TILE_M: usize = 64;
const TILE_N: usize = 64;
const TILE_K: usize = 64;

/// Minimum multiply-adds before row tiles go to the rayon pool.
const PAR_WORK_THRESHOLD: usize = 1 << 20;

/// C[M,N] += A[M,K] @ B[K,N], all row-major.
pub fn sgemm(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    assert!(a.len() >= m * k, "sgemm: A too small");
    assert!(b.len() >= k * n, "sgemm: B too small");
    assert!(c.len() >= m * n, "sgemm: C too small");
    if m == 0 || n == 0 || k == 0 {
        return;
    }

    let c = &mut c[..m * n];
    if m > TILE_M && m * n * k >= PAR_WORK_THRESHOLD {
        c.par_chunks_mut(TILE_M * n)
            .enumerate()
            .for_each(|(tile, c_rows)| {
                let row0 = tile * TILE_M;
                gemm_rows(a, b, c_rows, row0, c_rows.len() / n, n, k);
            });
    } else {
        for (tile, c_rows) in c.chunks_mut(TILE_M * n).enumerate() {
            let rows = c_rows.len() / n;
            gemm_rows(a, b, c_rows, tile * TILE_M, rows, n, k);
        }
    }
}

/// Accumulate `rows` rows of C starting at `row0` into `c_rows`.
fn gemm_rows(a: &[f32], b: &[f32], c_rows: &mut [f32], row0: usize, rows: usize, n: usize, k: usize) {
    for j0 in (0..n).step_by(TILE_N) {
        let j_end = (j0 + TILE_N).min(n);
        for p0 in (0..k).step_by(TILE_K) {
            let p_end = (p0 + TILE_K).min(k);
            for i in 0..rows {
                let a_row = &a[(row0 + i) * k..(row0 + i + 1) * k];
                let c_row = &mut c_rows[i * n + j0..i * n + j_end];
                for p in p0..p_end {
                    let a_val = a_row[p];
                    let b_row = &b[p * n + j0..p * n + j_end];
                    for (cv, &bv) in c_row.iter_mut().zip(b_row) {
                        *cv += a_val * bv;
                    }
                }
            }
        }
    }
}
