//! Rank-ordered byte-pair merging
//!
//! A piece of text (one pre-tokenizer match) starts as one part per byte.
//! The adjacent pair whose concatenation has the lowest rank in the
//! vocabulary is merged first, repeatedly, until no adjacent pair forms a
//! known token. Lower rank = merge earlier.

use std::collections::HashMap;

/// Token identifier. Ranks of ordinary tokens double as their ids.
pub type Rank = u32;

/// Merge `piece` and return the part boundaries.
///
/// Each entry is `(start_offset, rank_of_pair_starting_here)`. The final two
/// entries are sentinels, so consecutive entries delimit the merged parts.
fn byte_pair_merge(ranks: &HashMap<Vec<u8>, Rank>, piece: &[u8]) -> Vec<(usize, Rank)> {
    let mut parts = Vec::with_capacity(piece.len() + 1);

    let mut min_rank: (Rank, usize) = (Rank::MAX, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = ranks.get(&piece[i..i + 2]).copied().unwrap_or(Rank::MAX);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    parts.push((piece.len() - 1, Rank::MAX));
    parts.push((piece.len(), Rank::MAX));

    // Rank of the pair that would start at `i` once `i + 1` is merged away.
    let get_rank = |parts: &Vec<(usize, Rank)>, i: usize| {
        if i + 3 < parts.len() {
            ranks
                .get(&piece[parts[i].0..parts[i + 3].0])
                .copied()
                .unwrap_or(Rank::MAX)
        } else {
            Rank::MAX
        }
    };

    while min_rank.0 != Rank::MAX {
        let i = min_rank.1;
        if i > 0 {
            parts[i - 1].1 = get_rank(&parts, i - 1);
        }
        parts[i].1 = get_rank(&parts, i);
        parts.remove(i + 1);

        min_rank = (Rank::MAX, usize::MAX);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }
    }
    parts
}

/// Encode one pre-tokenized piece into ranks.
///
/// The vocabulary must contain every single byte; `CoreBpe::new` checks this,
/// so every merged part is guaranteed to have a rank.
pub(crate) fn byte_pair_encode(piece: &[u8], ranks: &HashMap<Vec<u8>, Rank>) -> Vec<Rank> {
    match piece.len() {
        0 => return Vec::new(),
        1 => return vec![ranks[piece]],
        _ => {}
    }
    byte_pair_merge(ranks, piece)
        .windows(2)
        .map(|part| ranks[&piece[part[0].0..part[1].0]])
        .collect()
}
