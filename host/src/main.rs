use std::path::PathBuf;

use anyhow::{Context, Result};
use bitcoin::Txid;
use bitcoin_proof_core::{Assembler, BundleOptions, CheckpointEncoding, Lattice, RecordStore};
use clap::{Parser, Subcommand};
use host::{
    config::{Config, ProviderKind, StoreKind},
    esplora::EsploraClient,
    fixture::{self, PegOutFields},
    open_store,
};
use serde_json::{json, Value};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bitcoin-proof", version, about = "Assemble checkpointed SPV proofs from a block explorer")]
struct Cli {
    /// Explorer preset (blockstream, mutinynet) or an Esplora base URL.
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    store: Option<StoreKind>,

    #[arg(long, global = true)]
    sqlite_path: Option<PathBuf>,

    /// Fixture file to merge peg-in / peg-out results into.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Document to start from when the fixture file does not exist yet.
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    /// Put compact_size(index) before the raw transaction in the blob.
    #[arg(long, global = true)]
    index_prefix: bool,

    /// What parent and child lists carry: hashes or headers. `params --blob` defaults
    /// to hashes, everything else to headers.
    #[arg(long, global = true)]
    checkpoints: Option<CheckpointEncoding>,

    /// Prefix hex output with 0x.
    #[arg(long, global = true)]
    hex_prefix: bool,

    /// Skip recomputing the merkle root against the block header.
    #[arg(long, global = true)]
    no_verify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deposit and confirmation proofs on one shared header chain.
    PegIn { txid1: Txid, txid2: Txid },
    /// Withdrawal proof with its header chain.
    PegOut {
        txid: Txid,
        /// EVM address stored as `pegOut.withdrawer`.
        #[arg(long)]
        withdrawer: Option<String>,
        #[arg(long)]
        peg_out_timestamp: Option<u64>,
        /// Withdrawn amount in satoshis.
        #[arg(long)]
        amount: Option<u64>,
    },
    /// Proof bundle for one transaction on an explicit `step:initial_height` lattice.
    Params {
        lattice: String,
        txid: Txid,
        /// Print the binary blob as hex instead of JSON.
        #[arg(long)]
        blob: bool,
    },
    /// Concatenated headers for `count` blocks from `start`.
    Headers { start: u64, count: u64 },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(provider) = &self.provider {
            config.provider = provider.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(path) = &self.sqlite_path {
            config.sqlite_path = path.clone();
        }
    }

    fn options(&self) -> BundleOptions {
        BundleOptions {
            checkpoints: self.checkpoints.unwrap_or(match self.command {
                Command::Params { blob: true, .. } => CheckpointEncoding::Hashes,
                _ => CheckpointEncoding::Headers,
            }),
            index_prefix: self.index_prefix,
            hex_prefix: self.hex_prefix,
            verify_inclusion: !self.no_verify,
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run<S: RecordStore>(cli: &Cli, assembler: Assembler<EsploraClient, S>) -> Result<()> {
    match &cli.command {
        Command::PegOut {
            txid,
            withdrawer,
            peg_out_timestamp,
            amount,
        } => {
            let peg_out = assembler
                .peg_out(txid)
                .await
                .with_context(|| format!("failed to assemble peg-out for {txid}"))?;
            let fields = PegOutFields {
                withdrawer: withdrawer.clone(),
                peg_out_timestamp: *peg_out_timestamp,
                amount: *amount,
            };
            let merge = |doc: &mut Value| {
                fixture::merge_peg_out(doc, &peg_out)?;
                fixture::set_peg_out_fields(doc, &fields)
            };
            let mut doc = json!({});
            merge(&mut doc)?;
            if let Some(path) = &cli.output {
                fixture::update_file(path, cli.template.as_deref(), merge)?;
            }
            print_json(&doc["pegOut"])
        }
        Command::PegIn { txid1, txid2 } => {
            let peg_in = assembler
                .peg_in(txid1, txid2)
                .await
                .with_context(|| format!("failed to assemble peg-in for {txid1} and {txid2}"))?;
            let mut doc = json!({});
            fixture::merge_peg_in(&mut doc, &peg_in)?;
            if let Some(path) = &cli.output {
                fixture::update_file(path, cli.template.as_deref(), |existing| {
                    fixture::merge_peg_in(existing, &peg_in)
                })?;
            }
            print_json(&doc["pegIn"])
        }
        Command::Params {
            lattice,
            txid,
            blob,
        } => {
            let lattice = Lattice::parse(lattice)?;
            let bundle = assembler
                .proof_params(txid, lattice)
                .await
                .with_context(|| format!("failed to assemble proof for {txid}"))?;
            if *blob {
                println!("{}", bundle.to_hex()?);
                Ok(())
            } else {
                print_json(&serde_json::to_value(bundle.view())?)
            }
        }
        Command::Headers { start, count } => {
            let headers = assembler
                .block_headers(*start, *count)
                .await
                .with_context(|| format!("failed to fetch {count} headers from {start}"))?;
            let headers = bitcoin_proof_core::coder::hex_string(&headers, cli.hex_prefix);
            println!("{headers}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;
    cli.apply(&mut config);
    info!(provider = %config.provider, url = config.base_url(), "starting");

    let client = EsploraClient::from_config(&config)?;
    let store = open_store(&config)?;
    let assembler = Assembler::new(client, store)
        .with_step(config.step)
        .with_block_count(config.block_count)
        .with_options(cli.options());

    run(&cli, assembler).await
}
