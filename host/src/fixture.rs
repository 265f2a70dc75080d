//! Test-fixture documents for the bridge contracts.
//!
//! A fixture holds a `pegIn` and a `pegOut` section. Each one carries the header chain
//! submitted to the light client (`storage.submit`), the checkpoint it is constructed
//! from (`storage.constructor`) and the inclusion proofs (`verification`). Writing merges
//! into an existing document so hand-maintained keys survive regeneration.

use std::{fs, io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use bitcoin_proof_core::{coder::hex_string, HeaderChain, PegIn, PegOut, ProofBundle};
use serde_json::{json, Map, Value};
use tracing::info;

fn child<'a>(parent: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>> {
    parent
        .entry(key)
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .with_context(|| format!("fixture field {key} is not an object"))
}

fn set_storage(section: &mut Map<String, Value>, chain: &HeaderChain, prefixed: bool) -> Result<()> {
    let mut constructor = serde_json::to_value(&chain.anchor)?;
    constructor["hash"] = json!(hex_string(&chain.anchor.hash.to_string(), prefixed));

    let storage = child(section, "storage")?;
    storage.insert(
        "submit".into(),
        json!([{ "headers": hex_string(&chain.headers, prefixed) }]),
    );
    storage.insert("constructor".into(), constructor);
    Ok(())
}

fn proof_value(bundle: &ProofBundle) -> Result<Value> {
    Ok(serde_json::to_value(bundle.view())?)
}

/// Replaces `pegOut.storage` and `pegOut.verification.proof`.
pub fn merge_peg_out(doc: &mut Value, peg_out: &PegOut) -> Result<()> {
    let prefixed = peg_out.proof.options.hex_prefix;
    let root = doc.as_object_mut().context("fixture root is not an object")?;
    let section = child(root, "pegOut")?;
    set_storage(section, &peg_out.chain, prefixed)?;
    child(section, "verification")?.insert("proof".into(), proof_value(&peg_out.proof)?);
    Ok(())
}

/// Replaces `pegIn.storage` and `pegIn.verification.proof1`/`proof2`.
pub fn merge_peg_in(doc: &mut Value, peg_in: &PegIn) -> Result<()> {
    let prefixed = peg_in.proof1.options.hex_prefix;
    let root = doc.as_object_mut().context("fixture root is not an object")?;
    let section = child(root, "pegIn")?;
    set_storage(section, &peg_in.chain, prefixed)?;
    let verification = child(section, "verification")?;
    verification.insert("proof1".into(), proof_value(&peg_in.proof1)?);
    verification.insert("proof2".into(), proof_value(&peg_in.proof2)?);
    Ok(())
}

/// Hand-supplied peg-out values stored beside the generated proof.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PegOutFields {
    /// EVM address receiving the withdrawal.
    pub withdrawer: Option<String>,
    pub peg_out_timestamp: Option<u64>,
    /// Amount in satoshis.
    pub amount: Option<u64>,
}

impl PegOutFields {
    pub fn is_empty(&self) -> bool {
        self == &PegOutFields::default()
    }
}

/// Writes the fields that are set into `pegOut`, leaving the others untouched.
pub fn set_peg_out_fields(doc: &mut Value, fields: &PegOutFields) -> Result<()> {
    let root = doc.as_object_mut().context("fixture root is not an object")?;
    let section = child(root, "pegOut")?;
    if let Some(withdrawer) = &fields.withdrawer {
        section.insert("withdrawer".into(), json!(withdrawer));
    }
    if let Some(timestamp) = fields.peg_out_timestamp {
        section.insert("pegOutTimestamp".into(), json!(timestamp));
    }
    if let Some(amount) = fields.amount {
        section.insert("amount".into(), json!(amount));
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<Option<Value>> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .with_context(|| format!("failed to parse fixture {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read fixture {}", path.display())),
    }
}

/// Loads the document at `path`, falling back to `template` and then to an empty object,
/// applies `merge`, and writes it back as pretty JSON with a trailing newline.
pub fn update_file(
    path: &Path,
    template: Option<&Path>,
    merge: impl FnOnce(&mut Value) -> Result<()>,
) -> Result<()> {
    let mut doc = match read_document(path)? {
        Some(doc) => doc,
        None => match template {
            Some(template) => read_document(template)?
                .with_context(|| format!("template {} not found", template.display()))?,
            None => json!({}),
        },
    };
    merge(&mut doc)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(&doc)?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("failed to write fixture {}", path.display()))?;
    info!(path = %path.display(), "fixture updated");
    Ok(())
}
