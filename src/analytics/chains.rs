//! Argument-chain graph construction.
//!
//! Builds a DAG over the transcript where an edge `(i → j)` means turn
//! `j` refers to or rebuts turn `i`. Turns refer to earlier turns by
//! integer index only; the graph is built post-hoc over the append-only
//! turn list, so no cyclic structure can exist. The strongest chains are
//! those maximising cumulative strength × depth.

use serde::{Deserialize, Serialize};

use crate::analysis::similarity::overlap_ratio;
use crate::session::Turn;

/// Lexical overlap at or above which a turn counts as referring back.
const REFERENCE_OVERLAP: f64 = 0.18;

/// One reference edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChainEdge {
    /// Referenced (earlier) turn index.
    pub from: usize,
    /// Referring (later) turn index.
    pub to: usize,
    /// Lexical overlap that produced the edge.
    pub weight: f64,
}

/// A maximal-strength chain through the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    /// Turn indices, oldest first.
    pub turns: Vec<usize>,
    /// Sum of argument strengths along the chain.
    pub cumulative_strength: f64,
    /// Chain length.
    pub depth: usize,
    /// Ranking score: cumulative strength × depth.
    pub score: f64,
}

/// The argument-chain graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentChainGraph {
    /// Turns in the graph.
    pub node_count: usize,
    /// Reference edges.
    pub edges: Vec<ChainEdge>,
    /// Strongest chains, best first (up to three).
    pub strongest: Vec<Chain>,
}

/// Build the chain graph over a transcript.
///
/// # Errors
///
/// Returns an error when the transcript has fewer than two turns.
pub fn build(turns: &[Turn]) -> Result<ArgumentChainGraph, String> {
    if turns.len() < 2 {
        return Err(format!(
            "argument chains need at least 2 turns, transcript has {}",
            turns.len()
        ));
    }

    let mut edges = Vec::new();
    for (j, later) in turns.iter().enumerate() {
        for earlier in &turns[..j] {
            let weight = overlap_ratio(&later.content, &earlier.content);
            if weight >= REFERENCE_OVERLAP {
                edges.push(ChainEdge {
                    from: earlier.index,
                    to: later.index,
                    weight,
                });
            }
        }
    }

    // Longest-path DP over the index-ordered DAG: the best chain ending
    // at each turn, with parent pointers for reconstruction.
    let mut best_strength: Vec<f64> = turns.iter().map(|t| t.analysis.strength).collect();
    let mut best_depth: Vec<usize> = vec![1; turns.len()];
    let mut parent: Vec<Option<usize>> = vec![None; turns.len()];

    for edge in &edges {
        let candidate = best_strength[edge.from] + turns[edge.to].analysis.strength;
        if candidate > best_strength[edge.to] {
            best_strength[edge.to] = candidate;
            best_depth[edge.to] = best_depth[edge.from] + 1;
            parent[edge.to] = Some(edge.from);
        }
    }

    let mut ranked: Vec<usize> = (0..turns.len()).collect();
    #[allow(clippy::cast_precision_loss)]
    ranked.sort_by(|&a, &b| {
        (best_strength[b] * best_depth[b] as f64)
            .total_cmp(&(best_strength[a] * best_depth[a] as f64))
    });

    let mut strongest = Vec::new();
    let mut used = std::collections::HashSet::new();
    for &end in &ranked {
        if strongest.len() >= 3 {
            break;
        }
        if used.contains(&end) {
            continue;
        }
        let mut chain = Vec::new();
        let mut cursor = Some(end);
        while let Some(i) = cursor {
            chain.push(i);
            used.insert(i);
            cursor = parent[i];
        }
        chain.reverse();
        #[allow(clippy::cast_precision_loss)]
        let score = best_strength[end] * best_depth[end] as f64;
        strongest.push(Chain {
            turns: chain,
            cumulative_strength: best_strength[end],
            depth: best_depth[end],
            score,
        });
    }

    Ok(ArgumentChainGraph {
        node_count: turns.len(),
        edges,
        strongest,
    })
}
