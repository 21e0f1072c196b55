//! Command handlers for the tensorfuzz CLI

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use humansize::{DECIMAL, format_size};
use std::fs;
use std::path::PathBuf;
use tensorfuzz::harness::{Driver, DriverConfig, Status};
use tensorfuzz::{ByteCursor, DecodeLimits, Decoder, NdTensor, Tensor, Triage, targets};

use crate::utils::{collect_inputs, create_progress_bar, format_shape};

/// Number of values shown per tensor by `decode`
const PREVIEW_LEN: usize = 6;

/// Largest tensor payload `decode` lets the decoder allocate
pub const MAX_DECODE_BYTES: u128 = 1 << 30;

// ============================================================================
// Target listing
// ============================================================================

/// Print every registered target
pub fn print_targets_table() {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Name", "Min size", "Exercises"]);
    for (i, target) in targets::all().iter().enumerate() {
        table.add_row(Row::from(vec![
            Cell::new(i),
            Cell::new(target.name),
            Cell::new(target.min_size),
            Cell::new(target.summary),
        ]));
    }
    println!("{}", table);
}

// ============================================================================
// Replay
// ============================================================================

/// Outcome of replaying a set of inputs against one target
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub kept: usize,
    pub discarded: Vec<PathBuf>,
    pub bytes: u64,
}

impl ReplaySummary {
    pub fn total(&self) -> usize {
        self.kept + self.discarded.len()
    }
}

/// Replay reproducer files against `target_name` with panics caught
pub fn replay(target_name: &str, paths: &[String], triage_dir: Option<&str>) -> Result<ReplaySummary> {
    let Some(target) = targets::find(target_name) else {
        let names: Vec<_> = targets::all().iter().map(|t| t.name).collect();
        bail!("Unknown target '{}'. Available targets: {}", target_name, names.join(", "));
    };
    let files = collect_inputs(paths)?;
    if files.is_empty() {
        bail!("No input files found.");
    }

    let mut config = DriverConfig::from_env()
        .with_catch_panics(true)
        .with_progress_interval(0);
    if let Some(dir) = triage_dir {
        config = config.with_triage(Some(Triage::new(dir)));
    }
    let mut driver = Driver::new(config);

    let pb = create_progress_bar(files.len() as u64)?;
    let mut summary = ReplaySummary::default();
    for file in &files {
        let data = fs::read(file).with_context(|| format!("Failed to read '{}'", file.display()))?;
        summary.bytes += data.len() as u64;
        match driver.run(target, &data) {
            Status::Keep => summary.kept += 1,
            Status::Discard => summary.discarded.push(file.clone()),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(summary)
}

/// Print a replay summary, listing discarded inputs if any
pub fn print_replay_summary(target_name: &str, summary: &ReplaySummary) {
    println!(
        "Replayed {} input(s) ({}) against '{}': {} kept, {} discarded",
        summary.total(),
        format_size(summary.bytes, DECIMAL),
        target_name,
        summary.kept,
        summary.discarded.len()
    );
    if summary.discarded.is_empty() {
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Discarded input"]);
    for (i, path) in summary.discarded.iter().enumerate() {
        table.add_row(Row::from(vec![Cell::new(i), Cell::new(path.display())]));
    }
    println!("{}", table);
}

// ============================================================================
// Decode
// ============================================================================

/// One tensor extracted from an input file
pub struct DecodedEntry {
    pub offset: usize,
    pub tensor: Tensor,
}

/// Decode tensors from `data` in sequence until the input runs dry, `max`
/// is reached or the decoder fails. Returns the entries, the error if one
/// stopped decoding, and the number of bytes left over.
pub fn decode_bytes(
    data: &[u8],
    limits: DecodeLimits,
    max: usize,
) -> (Vec<DecodedEntry>, Option<tensorfuzz::Error>, usize) {
    let decoder = Decoder::new(limits);
    let mut cursor = ByteCursor::new(data);
    let mut entries = Vec::new();
    while entries.len() < max && cursor.remaining() >= 2 {
        let offset = cursor.offset();
        match decoder.tensor(&mut cursor) {
            Ok(tensor) => entries.push(DecodedEntry { offset, tensor }),
            Err(e) => return (entries, Some(e), cursor.remaining()),
        }
    }
    (entries, None, cursor.remaining())
}

fn preview(tensor: &Tensor) -> String {
    let values = match NdTensor::from_payload(tensor).and_then(|t| t.real_array("preview")) {
        Ok(values) => values,
        Err(_) => return "-".to_string(),
    };
    let mut shown: Vec<String> = values.iter().take(PREVIEW_LEN).map(|v| format!("{:.4}", v)).collect();
    if values.len() > PREVIEW_LEN {
        shown.push("...".to_string());
    }
    format!("[{}]", shown.join(", "))
}

/// Print every tensor the decoder extracts from `file`
/// Worst-case payload of one tensor decoded under `limits`: the largest
/// dimension raised to the largest rank, times the widest dtype.
pub fn worst_case_bytes(limits: &DecodeLimits) -> Option<u128> {
    let largest = limits.min_dim.max(limits.max_dim).max(0) as u128;
    let rank = u32::from(limits.min_rank.max(limits.max_rank));
    let widest = tensorfuzz::SUPPORTED_DTYPES.iter().map(|d| d.byte_size()).max().unwrap_or(1) as u128;
    largest.checked_pow(rank)?.checked_mul(widest)
}

/// Refuses limits whose worst-case tensor exceeds `MAX_DECODE_BYTES`
pub fn check_decode_limits(limits: &DecodeLimits) -> Result<()> {
    match worst_case_bytes(limits) {
        Some(bytes) if bytes <= MAX_DECODE_BYTES => Ok(()),
        _ => bail!(
            "Limits allow tensors larger than {} (max dim {}, max rank {}); lower --max-dim or --max-rank",
            format_size(MAX_DECODE_BYTES as u64, DECIMAL),
            limits.max_dim,
            limits.max_rank
        ),
    }
}

pub fn print_decoded_file(file: &str, limits: DecodeLimits, max: usize) -> Result<()> {
    check_decode_limits(&limits)?;
    let data = fs::read(file).with_context(|| format!("Failed to read '{}'", file))?;
    let (entries, error, trailing) = decode_bytes(&data, limits, max);

    println!("File: {}", file);
    println!("Size: {}", format_size(data.len() as u64, DECIMAL));
    println!("Tensors: {}", entries.len());
    println!();

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Offset", "DType", "Shape", "Elements", "Size", "Values"]);
    for (i, entry) in entries.iter().enumerate() {
        let tensor = &entry.tensor;
        table.add_row(Row::from(vec![
            Cell::new(i),
            Cell::new(entry.offset),
            Cell::new(tensor.dtype),
            Cell::new(format_shape(&tensor.shape)),
            Cell::new(tensor.num_elements()),
            Cell::new(format_size(tensor.byte_size() as u64, DECIMAL)),
            Cell::new(preview(tensor)),
        ]));
    }
    println!("{}", table);

    if let Some(e) = error {
        println!("Decoding stopped: {}", e);
    }
    if trailing > 0 {
        println!("Trailing bytes: {}", trailing);
    }
    Ok(())
}
