//! Capacity-weighted partitioning of work across nodes

use fleetindex_core::error::{Error, Result};
use fleetindex_core::{Chunk, NodeSpec, WorkItem};
use tracing::info;

/// Splits `items` into one contiguous chunk per node, in node order
///
/// Every node but the last receives `floor(total * weight)` items taken left
/// to right; the last node receives whatever remains. Weights need not sum to
/// one, so the last node's share absorbs both rounding loss and any skew.
pub fn partition(items: &[WorkItem], nodes: &[NodeSpec]) -> Result<Vec<Chunk>> {
    if items.is_empty() {
        return Err(Error::config("Cannot partition an empty work list"));
    }
    if nodes.is_empty() {
        return Err(Error::config("No nodes configured"));
    }

    let weights = nodes
        .iter()
        .map(NodeSpec::require_weight)
        .collect::<Result<Vec<_>>>()?;

    let total = items.len();
    let mut start = 0;
    let mut chunks = Vec::with_capacity(nodes.len());
    for (idx, (node, weight)) in nodes.iter().zip(weights).enumerate() {
        let end = if idx + 1 == nodes.len() {
            total
        } else {
            let size = (total as f64 * weight).floor() as usize;
            (start + size).min(total)
        };
        chunks.push(Chunk {
            node: node.clone(),
            items: items[start..end].to_vec(),
        });
        start = end;
    }

    Ok(chunks)
}

/// Logs how many items each node received
pub fn log_distribution(chunks: &[Chunk]) {
    let total: usize = chunks.iter().map(Chunk::len).sum();
    info!("Work distribution ({total} items):");
    for chunk in chunks {
        let pct = if total == 0 {
            0.0
        } else {
            chunk.len() as f64 / total as f64 * 100.0
        };
        info!(
            "  {} (weight {:.2}): {} items ({pct:.1}%)",
            chunk.node.hostname,
            chunk.node.weight.unwrap_or_default(),
            chunk.len()
        );
    }
}
