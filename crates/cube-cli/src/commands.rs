use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use cube_ingest::{
    Source, load_nested, long_to_frames, read_csv_table, table_to_frame, write_csv,
};
use cube_match::{
    MatchConfig, MatchOptions, MatchPair, MatchResult, Side, TemporalOptions, UnmatchReport,
    match_sites, unmatch,
};
use cube_model::{CubeSchema, LongDataset, NestedDataset, Value};
use cube_transform::{as_nested, detect_invariant, promote, to_long, unfold};
use tracing::{info, info_span};

use crate::cli::{InspectArgs, LongArgs, MatchArgs, SideArg, UnmatchArgs};
use crate::types::{InspectResult, LongResult, PairRecord};

pub fn run_inspect(args: &InspectArgs) -> Result<InspectResult> {
    let schema = args.schema.schema();
    let table = read_csv_table(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let classes = detect_invariant(&table, schema.key()).context("classify columns")?;
    let nested = as_nested(&table, &schema).context("build nested form")?;
    Ok(InspectResult {
        input: args.input.clone(),
        sites: nested.len(),
        observations: nested.observation_count(),
        invariant: classes.invariant,
        variant: classes.variant,
        ignored: classes.ignored,
    })
}

pub fn run_long(args: &LongArgs) -> Result<LongResult> {
    let _span = info_span!("long", input = %args.input.display()).entered();
    let schema = args.schema.schema();
    let nested = load(&args.input, &schema)?;
    let mut long = to_long(&nested).context("convert to long form")?;
    if let Some(column) = &args.promote {
        long = promote(&long, column).with_context(|| format!("promote '{column}'"))?;
    }
    if !args.unfold.is_empty() {
        long = unfold(&long, &args.unfold).context("unfold sidecar columns")?;
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(|| {
        args.input
            .parent()
            .map_or_else(|| PathBuf::from("long"), |dir| dir.join("long"))
    });
    let (observations_csv, sidecar_csv) = write_long(&long, &output_dir)?;
    Ok(LongResult {
        observations: long.len(),
        sites: long.sidecar().len(),
        observations_csv,
        sidecar_csv,
    })
}

pub fn run_match(args: &MatchArgs) -> Result<MatchResult> {
    let schema = args.schema.schema();
    let major = load(&args.major, &schema)?;
    let minor = load(&args.minor, &schema)?;
    let options = match_options(args, &major, &minor)?;

    let result = match_sites(&major, &minor, &options)
        .context("match sites")?
        .into_matched()
        .ok_or_else(|| anyhow!("match mode is 'unmatch'; use the unmatch command"))?;

    if let Some(path) = &args.json {
        let records: Vec<PairRecord> = result.pairs.iter().map(PairRecord::from).collect();
        let json = serde_json::to_string_pretty(&records).context("serialize pairs")?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), pairs = records.len(), "pairs written");
    }
    if let Some(dir) = &args.output_dir {
        let long = to_long(&result.dataset).context("convert matched sites to long form")?;
        write_long(&long, dir)?;
    }
    Ok(result)
}

pub fn run_unmatch(args: &UnmatchArgs) -> Result<UnmatchReport> {
    let schema = args.schema.schema();
    let major = load(&args.major, &schema)?;
    let minor = load(&args.minor, &schema)?;
    Ok(unmatch(&major, &minor))
}

/// Options from `--config`, then `--pairs`, then the individual flags.
pub fn match_options(
    args: &MatchArgs,
    major: &NestedDataset,
    minor: &NestedDataset,
) -> Result<MatchOptions> {
    let mut options = match &args.config {
        Some(path) => MatchConfig::load(path)
            .and_then(MatchConfig::into_options)
            .with_context(|| format!("load config {}", path.display()))?,
        None => MatchOptions::default(),
    };
    if let Some(path) = &args.pairs {
        options = options.with_pairs(read_pairs(path, major, minor)?);
    }
    if let Some(spatial) = options.spatial.as_mut() {
        if let Some(n_keep) = args.n_keep {
            spatial.n_keep = n_keep;
        }
        if let Some(dist_max) = args.dist_max {
            spatial.dist_max = dist_max;
        }
        if args.single_match {
            spatial.single_match = true;
        }
        if args.n_group.is_some() {
            spatial.n_group = args.n_group;
        }
    }
    if args.wants_temporal() {
        let temporal = options.temporal.get_or_insert_with(TemporalOptions::default);
        if let Some((minor_var, major_var)) = &args.by {
            temporal.by.clear();
            temporal.by.insert(minor_var.clone(), major_var.clone());
        }
        if let Some(side) = args.independent {
            temporal.independent = match side {
                SideArg::Major => Side::Major,
                SideArg::Minor => Side::Minor,
            };
        }
        if let Some(n_highest) = args.n_highest {
            temporal.n_highest = n_highest;
        }
        if let Some(window) = args.window {
            temporal.window = window;
        }
        if let Some(min_match) = args.min_match {
            temporal.min_match = min_match;
        }
    }
    options.validate().context("match options")?;
    Ok(options)
}

fn load(path: &Path, schema: &CubeSchema) -> Result<NestedDataset> {
    load_nested(Source::Csv(path.to_path_buf()), schema)
        .with_context(|| format!("load {}", path.display()))
}

/// Pairs file keys are matched against the keys' text form.
fn read_pairs(path: &Path, major: &NestedDataset, minor: &NestedDataset) -> Result<Vec<MatchPair>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let records: Vec<PairRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("parse pairs {}", path.display()))?;
    let major_keys = keys_by_text(major);
    let minor_keys = keys_by_text(minor);
    records
        .into_iter()
        .map(|record| -> Result<MatchPair> {
            let lookup = |keys: &HashMap<String, Value>, key: &str, side: &str| {
                keys.get(key)
                    .cloned()
                    .ok_or_else(|| anyhow!("{side} key '{key}' in {} is unknown", path.display()))
            };
            Ok(MatchPair {
                group: record.group,
                major: lookup(&major_keys, &record.major, "major")?,
                minor: lookup(&minor_keys, &record.minor, "minor")?,
                distance: record.distance,
                match_count: record.match_count,
            })
        })
        .collect()
}

fn keys_by_text(dataset: &NestedDataset) -> HashMap<String, Value> {
    dataset.keys().map(|k| (k.to_string(), k.clone())).collect()
}

fn write_long(long: &LongDataset, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let (mut observations, mut sidecar) = long_to_frames(long).context("build frames")?;
    let observations_csv = dir.join("observations.csv");
    let sidecar_csv = dir.join("sidecar.csv");
    write_csv(&mut observations, &observations_csv)
        .with_context(|| format!("write {}", observations_csv.display()))?;
    write_csv(&mut sidecar, &sidecar_csv)
        .with_context(|| format!("write {}", sidecar_csv.display()))?;
    if let Some(leaf) = long.leaf() {
        let leaf_csv = dir.join("leaf_sidecar.csv");
        let table = leaf.sidecar.to_table().context("build leaf sidecar")?;
        let mut frame = table_to_frame(&table).context("build leaf sidecar frame")?;
        write_csv(&mut frame, &leaf_csv)
            .with_context(|| format!("write {}", leaf_csv.display()))?;
    }
    info!(
        observations = long.len(),
        sites = long.sidecar().len(),
        dir = %dir.display(),
        "long form written"
    );
    Ok((observations_csv, sidecar_csv))
}
