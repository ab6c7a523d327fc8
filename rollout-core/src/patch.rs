//! bsdiff-style binary delta engine.
//!
//! `diff` finds long common regions between an old and a new buffer using a
//! suffix array over the old buffer, then encodes the new buffer as a stream
//! of control triples: `add_len` bytes produced by byte-wise addition against
//! the old buffer, `copy_len` literal bytes, and a signed `seek` repositioning
//! the old-buffer cursor. Control, diff, and extra blocks are each
//! deflate-compressed. `apply` reverses the process into a fresh buffer.
//!
//! Invariant: `apply(old, diff(old, new)) == new` for every pair of byte
//! sequences, including empty buffers.

use crate::{PatchError, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};
use tokio_util::sync::CancellationToken;

const PATCH_MAGIC: &[u8; 8] = b"RLOPATCH";
const HEADER_LEN: usize = 32;
const CTRL_ENTRY_LEN: usize = 24;

/// How often `apply` polls the cancellation token, in output bytes.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 20;

/// Produce a binary patch that transforms `old` into `new`.
pub fn diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let sa = suffix_array(old);

    let mut ctrl: Vec<u8> = Vec::new();
    let mut diff_block: Vec<u8> = Vec::new();
    let mut extra_block: Vec<u8> = Vec::new();

    let old_size = old.len();
    let new_size = new.len();

    let mut scan: usize = 0;
    let mut len: usize = 0;
    let mut pos: usize = 0;
    let mut last_scan: usize = 0;
    let mut last_pos: usize = 0;
    let mut last_offset: isize = 0;

    while scan < new_size {
        let mut old_score: i64 = 0;
        scan += len;
        let mut scsc = scan;

        while scan < new_size {
            let (l, p) = search(&sa, old, &new[scan..]);
            len = l;
            pos = p;

            while scsc < scan + len {
                let i = scsc as isize + last_offset;
                if i >= 0 && (i as usize) < old_size && old[i as usize] == new[scsc] {
                    old_score += 1;
                }
                scsc += 1;
            }

            if (len as i64 == old_score && len != 0) || len as i64 > old_score + 8 {
                break;
            }

            let i = scan as isize + last_offset;
            if i >= 0 && (i as usize) < old_size && old[i as usize] == new[scan] {
                old_score -= 1;
            }
            scan += 1;
        }

        if len as i64 != old_score || scan == new_size {
            // Extend the previous match forward as long as additions pay off.
            let mut s: i64 = 0;
            let mut best_f: i64 = 0;
            let mut len_f: usize = 0;
            let mut i: usize = 0;
            while last_scan + i < scan && last_pos + i < old_size {
                if old[last_pos + i] == new[last_scan + i] {
                    s += 1;
                }
                i += 1;
                if s * 2 - i as i64 > best_f * 2 - len_f as i64 {
                    best_f = s;
                    len_f = i;
                }
            }

            // Extend the next match backward.
            let mut len_b: usize = 0;
            if scan < new_size {
                let mut s: i64 = 0;
                let mut best_b: i64 = 0;
                let mut i: usize = 1;
                while scan >= last_scan + i && pos >= i {
                    if old[pos - i] == new[scan - i] {
                        s += 1;
                    }
                    if s * 2 - i as i64 > best_b * 2 - len_b as i64 {
                        best_b = s;
                        len_b = i;
                    }
                    i += 1;
                }
            }

            // The two extensions may overlap; split at the best crossover.
            if last_scan + len_f > scan - len_b {
                let overlap = (last_scan + len_f) - (scan - len_b);
                let mut s: i64 = 0;
                let mut best_s: i64 = 0;
                let mut len_s: usize = 0;
                for i in 0..overlap {
                    if new[last_scan + len_f - overlap + i] == old[last_pos + len_f - overlap + i]
                    {
                        s += 1;
                    }
                    if new[scan - len_b + i] == old[pos - len_b + i] {
                        s -= 1;
                    }
                    if s > best_s {
                        best_s = s;
                        len_s = i + 1;
                    }
                }
                len_f = len_f + len_s - overlap;
                len_b -= len_s;
            }

            for i in 0..len_f {
                diff_block.push(new[last_scan + i].wrapping_sub(old[last_pos + i]));
            }
            extra_block.extend_from_slice(&new[last_scan + len_f..scan - len_b]);

            let add_len = len_f as u64;
            let copy_len = ((scan - len_b) - (last_scan + len_f)) as u64;
            let seek = (pos as i64 - len_b as i64) - (last_pos as i64 + len_f as i64);
            ctrl.extend_from_slice(&add_len.to_le_bytes());
            ctrl.extend_from_slice(&copy_len.to_le_bytes());
            ctrl.extend_from_slice(&seek.to_le_bytes());

            last_scan = scan - len_b;
            last_pos = pos - len_b;
            last_offset = pos as isize - scan as isize;
        }
    }

    let ctrl_comp = deflate(&ctrl)?;
    let diff_comp = deflate(&diff_block)?;
    let extra_comp = deflate(&extra_block)?;

    let mut patch = Vec::with_capacity(HEADER_LEN + ctrl_comp.len() + diff_comp.len() + extra_comp.len());
    patch.extend_from_slice(PATCH_MAGIC);
    patch.extend_from_slice(&(ctrl_comp.len() as u64).to_le_bytes());
    patch.extend_from_slice(&(diff_comp.len() as u64).to_le_bytes());
    patch.extend_from_slice(&(new_size as u64).to_le_bytes());
    patch.extend_from_slice(&ctrl_comp);
    patch.extend_from_slice(&diff_comp);
    patch.extend_from_slice(&extra_comp);
    Ok(patch)
}

/// Apply a patch produced by [`diff`] to `old`, reconstructing the new buffer.
///
/// Writes into a fresh buffer, never in place; on cancellation the partial
/// buffer is dropped and [`crate::RolloutError::Cancelled`] is returned.
pub fn apply(old: &[u8], patch: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
    if patch.len() < HEADER_LEN || &patch[..8] != PATCH_MAGIC {
        return Err(PatchError::corrupt("bad patch header").into());
    }

    let ctrl_comp_len = read_u64(&patch[8..16]) as usize;
    let diff_comp_len = read_u64(&patch[16..24]) as usize;
    let new_size = read_u64(&patch[24..32]) as usize;

    let blocks_end = HEADER_LEN
        .checked_add(ctrl_comp_len)
        .and_then(|v| v.checked_add(diff_comp_len))
        .ok_or_else(|| PatchError::corrupt("block lengths overflow"))?;
    if blocks_end > patch.len() {
        return Err(PatchError::corrupt("truncated patch").into());
    }

    let ctrl = inflate(&patch[HEADER_LEN..HEADER_LEN + ctrl_comp_len])?;
    let diff_block = inflate(&patch[HEADER_LEN + ctrl_comp_len..blocks_end])?;
    let extra_block = inflate(&patch[blocks_end..])?;

    if ctrl.len() % CTRL_ENTRY_LEN != 0 {
        return Err(PatchError::corrupt("ragged control block").into());
    }

    let mut new = vec![0u8; new_size];
    let mut old_pos: i64 = 0;
    let mut new_pos: usize = 0;
    let mut diff_pos: usize = 0;
    let mut extra_pos: usize = 0;
    let mut next_cancel_check: u64 = 0;

    for entry in ctrl.chunks_exact(CTRL_ENTRY_LEN) {
        if new_pos as u64 >= next_cancel_check {
            if cancel.is_cancelled() {
                return Err(PatchError::Cancelled.into());
            }
            next_cancel_check = new_pos as u64 + CANCEL_CHECK_INTERVAL;
        }

        let add_len = read_u64(&entry[0..8]) as usize;
        let copy_len = read_u64(&entry[8..16]) as usize;
        let seek = read_u64(&entry[16..24]) as i64;

        // Run lengths come straight from the patch, so every bound uses
        // checked arithmetic.
        let add_end = new_pos
            .checked_add(add_len)
            .filter(|end| *end <= new_size)
            .ok_or_else(|| PatchError::corrupt("add run exceeds buffer"))?;
        let diff_end = diff_pos
            .checked_add(add_len)
            .filter(|end| *end <= diff_block.len())
            .ok_or_else(|| PatchError::corrupt("add run exceeds buffer"))?;
        if add_len > 0 {
            if old_pos < 0 {
                return Err(PatchError::corrupt("old buffer exhausted").into());
            }
            let old_start = old_pos as usize;
            let old_end = old_start
                .checked_add(add_len)
                .filter(|end| *end <= old.len())
                .ok_or_else(|| PatchError::corrupt("old buffer exhausted"))?;
            let old_run = &old[old_start..old_end];
            for i in 0..add_len {
                new[new_pos + i] = old_run[i].wrapping_add(diff_block[diff_pos + i]);
            }
        }
        new_pos = add_end;
        diff_pos = diff_end;

        let copy_end = new_pos
            .checked_add(copy_len)
            .filter(|end| *end <= new_size)
            .ok_or_else(|| PatchError::corrupt("copy run exceeds buffer"))?;
        let extra_end = extra_pos
            .checked_add(copy_len)
            .filter(|end| *end <= extra_block.len())
            .ok_or_else(|| PatchError::corrupt("copy run exceeds buffer"))?;
        new[new_pos..copy_end].copy_from_slice(&extra_block[extra_pos..extra_end]);
        new_pos = copy_end;
        extra_pos = extra_end;

        old_pos = old_pos
            .checked_add(add_len as i64)
            .and_then(|v| v.checked_add(seek))
            .ok_or_else(|| PatchError::corrupt("seek overflow"))?;
    }

    if new_pos != new_size {
        return Err(PatchError::corrupt("output shorter than declared size").into());
    }

    Ok(new)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PatchError::corrupt(format!("block decompression failed: {}", e)))?;
    Ok(out)
}

/// Suffix array by prefix doubling. O(n log^2 n), insensitive to repetitive
/// input, which matters for executable sections full of zero padding.
fn suffix_array(data: &[u8]) -> Vec<usize> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }

    let mut sa: Vec<usize> = (0..n).collect();
    let mut rank: Vec<i64> = data.iter().map(|&b| b as i64).collect();
    let mut next_rank: Vec<i64> = vec![0; n];

    let mut k = 1;
    loop {
        let key = |i: usize, rank: &[i64]| -> (i64, i64) {
            let second = if i + k < n { rank[i + k] } else { -1 };
            (rank[i], second)
        };

        sa.sort_unstable_by_key(|&i| key(i, &rank));

        next_rank[sa[0]] = 0;
        for j in 1..n {
            let bump = (key(sa[j], &rank) != key(sa[j - 1], &rank)) as i64;
            next_rank[sa[j]] = next_rank[sa[j - 1]] + bump;
        }
        rank.copy_from_slice(&next_rank);

        if rank[sa[n - 1]] as usize == n - 1 {
            break;
        }
        k *= 2;
        if k >= n {
            break;
        }
    }
    sa
}

/// Longest match of `target` among the sorted suffixes of `old`. The best
/// match is always adjacent to the insertion point of `target`.
fn search(sa: &[usize], old: &[u8], target: &[u8]) -> (usize, usize) {
    if sa.is_empty() || target.is_empty() {
        return (0, 0);
    }

    let mut lo = 0usize;
    let mut hi = sa.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if old[sa[mid]..] < *target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    let mut best_len = 0usize;
    let mut best_pos = 0usize;
    if lo < sa.len() {
        let l = common_prefix(&old[sa[lo]..], target);
        if l > best_len {
            best_len = l;
            best_pos = sa[lo];
        }
    }
    if lo > 0 {
        let l = common_prefix(&old[sa[lo - 1]..], target);
        if l > best_len {
            best_len = l;
            best_pos = sa[lo - 1];
        }
    }
    (best_len, best_pos)
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
