use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};

use crate::error::CoreError;
use crate::rpc::types::RawBlock;
use crate::types::{BlockHeight, ScriptType, Transaction, TxInput, TxOutput};

pub(super) fn parse_block_hash(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<BlockHash, CoreError> {
    parse_opt_block_hash(value, field)?
        .ok_or_else(|| CoreError::InvalidData(format!("missing {field}")))
}

pub(super) fn parse_raw_block(raw: &serde_json::Value) -> Result<RawBlock, CoreError> {
    let hash = parse_block_hash(raw.get("hash"), "hash")?;
    let height = BlockHeight(parse_integer_required::<u32>(raw.get("height"), "height")?);
    let previous_block_hash =
        parse_opt_block_hash(raw.get("previousblockhash"), "previousblockhash")?;
    let time = parse_integer_required::<u64>(raw.get("time"), "time")?;

    let txs = raw
        .get("tx")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            CoreError::InvalidData(format!(
                "block {hash}: missing decoded tx array (getblock verbosity 2 required)"
            ))
        })?;

    let transactions = txs
        .iter()
        .map(|tx| parse_transaction(tx, height))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RawBlock {
        hash,
        height,
        previous_block_hash,
        time,
        transactions,
    })
}

fn parse_transaction(
    raw: &serde_json::Value,
    height: BlockHeight,
) -> Result<Transaction, CoreError> {
    let txid = parse_txid(raw.get("txid"), "txid")?;

    let vin = raw
        .get("vin")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CoreError::InvalidData(format!("tx {txid}: missing vin array")))?;
    let vout = raw
        .get("vout")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CoreError::InvalidData(format!("tx {txid}: missing vout array")))?;

    Ok(Transaction {
        txid,
        block_height: height,
        inputs: parse_vin(vin)?,
        outputs: parse_vout(vout)?,
    })
}

pub(super) fn parse_txid(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Txid, CoreError> {
    let value = value
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidData(format!("missing {field}")))?;
    value
        .parse()
        .map_err(|e| CoreError::InvalidData(format!("invalid {field}: {e}")))
}

fn parse_opt_block_hash(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Option<BlockHash>, CoreError> {
    match value.and_then(serde_json::Value::as_str) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| CoreError::InvalidData(format!("invalid {field}: {e}"))),
    }
}

pub(super) fn parse_integer_required<T>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<T, CoreError>
where
    T: TryFrom<u64>,
{
    let n = value
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| CoreError::InvalidData(format!("missing {field}")))?;
    T::try_from(n).map_err(|_| CoreError::InvalidData(format!("{field} out of range: {n}")))
}

fn parse_vin(vin: &[serde_json::Value]) -> Result<Vec<TxInput>, CoreError> {
    vin.iter()
        .map(|input| {
            let sequence = parse_integer_required::<u32>(input.get("sequence"), "sequence")?;
            if input.get("coinbase").is_some() {
                return Ok(TxInput::coinbase(sequence));
            }

            let prev_txid = parse_txid(input.get("txid"), "vin.txid")?;
            let prev_vout = parse_integer_required::<u32>(input.get("vout"), "vin.vout")?;
            Ok(TxInput::spending(OutPoint::new(prev_txid, prev_vout), sequence))
        })
        .collect()
}

fn parse_vout(vout: &[serde_json::Value]) -> Result<Vec<TxOutput>, CoreError> {
    vout.iter()
        .map(|output| {
            let value = parse_btc_amount(
                output
                    .get("value")
                    .ok_or_else(|| CoreError::InvalidData("missing value in vout".into()))?,
            )?;
            let n = parse_integer_required::<u32>(output.get("n"), "vout.n")?;
            let spk = output
                .get("scriptPubKey")
                .ok_or_else(|| CoreError::InvalidData("missing scriptPubKey in vout".into()))?;

            Ok(TxOutput {
                n,
                value,
                addresses: parse_addresses(spk),
                script_type: parse_script_type(spk)?,
            })
        })
        .collect()
}

/// Nodes before v22 report `addresses: [..]`; later ones a single `address`.
fn parse_addresses(spk: &serde_json::Value) -> Vec<String> {
    if let Some(address) = spk.get("address").and_then(serde_json::Value::as_str) {
        return vec![address.to_owned()];
    }
    spk.get("addresses")
        .and_then(serde_json::Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Prefer the node's `type` label; fall back to classifying the script hex.
fn parse_script_type(spk: &serde_json::Value) -> Result<ScriptType, CoreError> {
    if let Some(label) = spk.get("type").and_then(serde_json::Value::as_str) {
        return Ok(ScriptType::from_label(label));
    }
    let hex_str = spk
        .get("hex")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidData("missing type and hex in scriptPubKey".into()))?;
    let script = ScriptBuf::from_hex(hex_str)
        .map_err(|e| CoreError::InvalidData(format!("invalid scriptPubKey hex: {e}")))?;
    Ok(ScriptType::classify(script.as_script()))
}

/// Parse a BTC amount from a JSON value.
///
/// Number values are parsed via `Amount::from_float_in` to support scientific
/// notation, while string values are parsed via `Amount::from_str_in`.
pub(super) fn parse_btc_amount(value: &serde_json::Value) -> Result<Amount, CoreError> {
    match value {
        serde_json::Value::Number(n) => {
            let parsed = n
                .as_f64()
                .ok_or_else(|| CoreError::InvalidData(format!("invalid BTC amount `{value}`")))?;
            Amount::from_float_in(parsed, bitcoin::Denomination::Bitcoin)
                .map_err(|e| CoreError::InvalidData(format!("invalid BTC amount `{value}`: {e}")))
        }
        serde_json::Value::String(s) => Amount::from_str_in(s, bitcoin::Denomination::Bitcoin)
            .map_err(|e| CoreError::InvalidData(format!("invalid BTC amount `{s}`: {e}"))),
        _ => Err(CoreError::InvalidData(format!(
            "expected numeric BTC amount, got: {value}"
        ))),
    }
}
