//! lexgraph CLI - text graphs and learned topologies from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Chain graph of a sentence
//! lexgraph chain "The cat sat on the mat."
//!
//! # Same graph as JSON
//! lexgraph chain "The cat sat on the mat." --json
//!
//! # kNN graph from an embedding matrix (JSON array of rows)
//! lexgraph topology emb.json --metric cosine --top-k 2
//!
//! # Epsilon graph with softmax-normalized incoming edges
//! lexgraph topology emb.json --epsilon 0.5 --edge-softmax
//!
//! # Learned topology over the words of a sentence
//! lexgraph construct "the cat sat on the mat" --dim 16 --top-k 3
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::{bail, Context, Result};
use candle_nn::VarMap;
use clap::{Parser, Subcommand};
use lexgraph_core::chain::raw_text_to_init_graph;
use lexgraph_core::{GraphData, Tokenizer, Vocab, WordTokenizer};
use lexgraph_nn::{
    adj_to_graph, DynamicGraphConstruction, DynamicGraphConstructionBase,
    DynamicGraphConstructionConfig, ExecutionContext, NodeEmbeddingGraphConstruction,
    SimMetricType,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexgraph")]
#[command(about = "Text graph and learned topology CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the chain graph of a piece of text
    Chain {
        /// Raw text
        text: String,

        /// Keep the original casing
        #[arg(long)]
        keep_case: bool,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Infer a weighted graph from node embeddings
    Topology {
        /// JSON file holding an array of equally long rows
        input: PathBuf,

        #[command(flatten)]
        graph: GraphArgs,

        /// Softmax-normalize the weights of each node's incoming edges
        #[arg(long)]
        edge_softmax: bool,
    },

    /// Learn a topology over the words of a piece of text
    Construct {
        /// Raw text
        text: String,

        #[command(flatten)]
        graph: GraphArgs,

        /// Word embedding size
        #[arg(long, default_value = "16")]
        dim: usize,
    },
}

#[derive(clap::Args)]
struct GraphArgs {
    /// Similarity metric
    #[arg(short, long, default_value = "cosine")]
    metric: SimMetricType,

    /// Keep the k most similar neighbours of every node
    #[arg(long, conflicts_with = "epsilon")]
    top_k: Option<usize>,

    /// Keep neighbours whose similarity exceeds this value
    #[arg(long)]
    epsilon: Option<f64>,

    /// Number of heads of multi-head metrics
    #[arg(long, default_value = "1")]
    num_heads: usize,

    /// Projection size of attention and rbf_kernel metrics
    #[arg(long)]
    hidden_size: Option<usize>,

    /// Configuration file; overrides the flags above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

impl GraphArgs {
    fn to_config(&self, input_size: usize) -> Result<DynamicGraphConstructionConfig> {
        if let Some(path) = &self.config {
            let mut config = DynamicGraphConstructionConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.input_size = Some(input_size);
            return Ok(config);
        }
        let mut config = DynamicGraphConstructionConfig::new(self.metric)
            .with_num_heads(self.num_heads)
            .with_input_size(input_size);
        config.top_k_neigh = self.top_k;
        config.epsilon_neigh = self.epsilon;
        config.hidden_size = self.hidden_size;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chain {
            text,
            keep_case,
            json,
        } => cmd_chain(&text, !keep_case, json),
        Commands::Topology {
            input,
            graph,
            edge_softmax,
        } => cmd_topology(&input, &graph, edge_softmax),
        Commands::Construct { text, graph, dim } => cmd_construct(&text, &graph, dim),
    }
}

fn cmd_chain(text: &str, lower_case: bool, json: bool) -> Result<()> {
    let graph = raw_text_to_init_graph(text, lower_case, &WordTokenizer);
    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }
    print_graph(&graph);
    Ok(())
}

fn load_embeddings(path: &Path) -> Result<Vec<Vec<f32>>> {
    let json =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let rows: Vec<Vec<f32>> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse embedding matrix {}", path.display()))?;
    if rows.is_empty() {
        bail!("{} holds no embeddings", path.display());
    }
    Ok(rows)
}

fn cmd_topology(input: &Path, args: &GraphArgs, edge_softmax: bool) -> Result<()> {
    let rows = load_embeddings(input)?;
    let ctx = ExecutionContext::cpu(args.seed);
    let emb = ctx
        .tensor_from_rows(&rows)
        .context("Embedding rows must all have the same length")?;

    let config = args.to_config(rows[0].len())?;
    let varmap = VarMap::new();
    let base = DynamicGraphConstructionBase::new(config, ctx.var_builder(&varmap))
        .context("Invalid graph construction settings")?;

    let sim = base.compute_similarity_metric(&emb, None)?;
    let adj = base.sparsify_graph(&sim)?;
    let graph = adj_to_graph(&adj, base.mask_off_val(), edge_softmax)?;
    print_graph(&graph);
    Ok(())
}

/// Vocabulary over the tokens the model will see for `text`.
fn text_vocab(text: &str, lower_case: bool) -> Vocab {
    let chain = raw_text_to_init_graph(text, lower_case, &WordTokenizer);
    Vocab::from_tokens(chain.tokens(), 1)
}

fn cmd_construct(text: &str, args: &GraphArgs, dim: usize) -> Result<()> {
    let config = args.to_config(dim)?;
    if WordTokenizer.tokenize(text).is_empty() {
        bail!("text has no tokens");
    }
    let vocab = text_vocab(text, config.lower_case);

    let ctx = ExecutionContext::cpu(args.seed);
    let varmap = VarMap::new();
    let model = NodeEmbeddingGraphConstruction::new(vocab, config, &ctx, ctx.var_builder(&varmap))
        .context("Invalid graph construction settings")?;

    let out = model.forward(text, false)?;
    print_graph(&out.graph);
    if let Some(reg) = out.graph_reg {
        println!("Graph regularization: {:.6}", reg.to_scalar::<f32>()?);
    }
    Ok(())
}

fn print_graph(graph: &GraphData) {
    println!("Nodes: {}", graph.node_count());
    println!("Edges: {}", graph.edge_count());
    for (i, token) in graph.tokens().iter().enumerate() {
        if !token.is_empty() {
            println!("  {i}\t{token}");
        }
    }
    for (src, dst, attrs) in graph.edges() {
        match attrs.weight {
            Some(w) => println!("  {src} -> {dst}\t{w:.4}"),
            None => println!("  {src} -> {dst}"),
        }
    }
}
