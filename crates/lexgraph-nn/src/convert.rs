//! Conversions between dense adjacency tensors and [`GraphData`].

use crate::Result;
use candle_core::{DType, Device, Tensor};
use lexgraph_core::GraphData;

/// Convert a dense `(N, N)` adjacency into a weighted graph.
///
/// Every entry different from `mask_off_val` becomes an edge `i -> j`
/// carrying the entry as weight. With `use_edge_softmax` the weights of the
/// edges entering each node are softmax-normalized.
pub fn adj_to_graph(adj: &Tensor, mask_off_val: f64, use_edge_softmax: bool) -> Result<GraphData> {
    let rows = adj.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    let n = rows.len();
    let off = mask_off_val as f32;

    let mut edges: Vec<(usize, usize, f32)> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if v != off {
                edges.push((i, j, v));
            }
        }
    }

    if use_edge_softmax {
        edge_softmax(&mut edges, n);
    }

    let mut graph = GraphData::with_capacity(n, edges.len());
    graph.add_nodes(n);
    for (src, dst, w) in edges {
        graph.add_weighted_edge(src, dst, w)?;
    }
    tracing::debug!(nodes = n, edges = graph.edge_count(), "converted adjacency to graph");
    Ok(graph)
}

/// Softmax of edge weights grouped by destination node.
fn edge_softmax(edges: &mut [(usize, usize, f32)], n: usize) {
    let mut max = vec![f32::NEG_INFINITY; n];
    for &(_, dst, w) in edges.iter() {
        max[dst] = max[dst].max(w);
    }
    let mut denom = vec![0f32; n];
    for e in edges.iter_mut() {
        e.2 = (e.2 - max[e.1]).exp();
        denom[e.1] += e.2;
    }
    for e in edges.iter_mut() {
        e.2 /= denom[e.1];
    }
}

/// Dense `(N, N)` adjacency with `A[src][dst]` = edge weight (1 if unweighted).
pub fn graph_to_adj(graph: &GraphData, device: &Device) -> Result<Tensor> {
    let n = graph.node_count();
    Ok(Tensor::from_vec(graph.dense_adjacency(), (n, n), device)?)
}

/// Dense `(N, N)` adjacency with `A[dst][src]` set for every edge, so that
/// `A.matmul(h)` sums messages from in-neighbours.
pub fn incoming_adjacency(graph: &GraphData, device: &Device) -> Result<Tensor> {
    Ok(graph_to_adj(graph, device)?.t()?.contiguous()?)
}
