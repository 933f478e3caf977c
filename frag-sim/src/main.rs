//! Replay document-editing workloads through a block-space allocator and
//! report the resulting fragmentation.
//!
//! One run: pick a sample from the dataset, synthesize the action stream
//! of the chosen writer model from the seed, play it through the chosen
//! allocator stack and print statistics (plus maps and a trace when asked).
//! Any invariant violation aborts the process with a non-zero exit code,
//! which `--rerun-until-bug` exploits to fuzz seeds overnight.

mod feed;

use std::io;
use std::path::PathBuf;

use anyhow::{ensure, Result};
use histo::Histogram;
use log::info;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use structopt::StructOpt;

use extent_alloc::stats::{free_runs, render_obj_id_map, render_obj_type_map, render_page_map};
use extent_alloc::{
    synthesize, AllocOpts, BlockCfg, Blocks, ObjRecord, Simulator, SpaceStats, Strategy,
    WorkloadParams, WriterModel,
};

/// Samples worth knowing by name.
const SAMPLE_SHORTCUTS: &[(&str, &str)] = &[
    ("lot", "uk-02"),   // a lot of draws, random size
    ("few", "dc-01"),   // very few draws, some tiny, some huge
    ("small", "fo-03"), // ~2k draws, most really small
];

#[derive(Debug, StructOpt)]
#[structopt(
    name = "frag-sim",
    about = "Replay document-editing workloads through block-space allocators and report fragmentation."
)]
struct Cli {
    /// Seed for the workload synthesizer.
    #[structopt(long, default_value = "31416")]
    seed: u64,

    /// Keep rerunning with fresh seeds until an invariant violation
    /// aborts the process.
    #[structopt(long)]
    rerun_until_bug: bool,

    /// How many actions each note-taker shuffle window spans.
    #[structopt(short = "w", long = "note-taker-back-w", default_value = "12")]
    note_taker_back_w: usize,

    /// Probability that the editor deletes a draw.
    #[structopt(long = "dp", default_value = "0.8")]
    del_prob: f64,

    /// Probability that the editor deletes an image draw.
    #[structopt(long = "idp", default_value = "0.08")]
    del_img_prob: f64,

    /// Scale of the size jitter applied on re-inserts, as a fraction of
    /// the block size.
    #[structopt(long = "rf", default_value = "0.25")]
    reinsert_chg_sz_factor: f64,

    /// Allocation strategy to drive.
    #[structopt(short = "a", long = "allocator", possible_values = Strategy::NAMES)]
    allocator: Strategy,

    /// Sample to pull from the dataset (or a shortcut: lot, few, small).
    #[structopt(short = "s", long = "sample", default_value = "ph-01")]
    sample: String,

    /// Merge adjacent holes on deallocation (kr-based allocators).
    #[structopt(long)]
    coalescing: bool,

    /// Editing style the synthesized workload imitates.
    #[structopt(short = "m", long = "writer-model", possible_values = WriterModel::NAMES, default_value = "editor")]
    writer_model: WriterModel,

    /// Delete without ever re-inserting.
    #[structopt(long = "no-reinsert")]
    no_reinsert: bool,

    /// Contract trailing free space after the run (the default).
    #[structopt(long, conflicts_with = "no-contract")]
    contract: bool,

    /// Skip the final contraction of trailing free space.
    #[structopt(long = "no-contract")]
    no_contract: bool,

    /// Print one line per simulator event, with allocator sub-traces.
    #[structopt(long)]
    trace: bool,

    /// Extent budget per allocation (linear-kr).
    #[structopt(long = "max-ext-cnt", default_value = "8")]
    max_ext_cnt: usize,

    /// Smallest leftover, in blocks, a hole split may leave behind (kr).
    #[structopt(long = "min-fr-split-remain", default_value = "1")]
    min_fr_split_remain: usize,

    /// Block size in bytes.
    #[structopt(long = "blk-sz", default_value = "512")]
    blk_sz: usize,

    /// Dataset with one row per drawn object.
    #[structopt(long = "dataset", default_value = "xopp-dataset-2023.csv", parse(from_os_str))]
    dataset: PathBuf,

    /// Final-state maps to print: objs, types and/or pages.
    #[structopt(long = "show-map", possible_values = &["objs", "types", "pages"])]
    show_map: Vec<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::from_args();

    if let Err(err) = run(&cli) {
        eprintln!("error: {:#}", err);
        std::process::exit(2);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = BlockCfg::new(cli.blk_sz);
    let sample = resolve_sample(&cli.sample);
    let records = feed::load_records(&cli.dataset, sample)?;
    ensure!(
        !records.is_empty(),
        "sample `{}` has no rows in {}",
        sample,
        cli.dataset.display()
    );
    info!("loaded {} feed rows for sample {}", records.len(), sample);

    let params = WorkloadParams {
        note_taker_back_w: cli.note_taker_back_w,
        del_prob: cli.del_prob,
        del_img_prob: cli.del_img_prob,
        reinsert_chg_sz_factor: cli.reinsert_chg_sz_factor,
        reinsert: !cli.no_reinsert,
    };

    let mut seed = cli.seed;
    let mut reseeder = XorShiftRng::seed_from_u64(cli.seed);
    loop {
        run_once(cli, cfg, &records, &params, seed);
        if !cli.rerun_until_bug {
            return Ok(());
        }
        seed = reseeder.gen();
        info!("no invariant violated, rerunning with seed {}", seed);
    }
}

fn run_once(cli: &Cli, cfg: BlockCfg, records: &[ObjRecord], params: &WorkloadParams, seed: u64) {
    let workload = synthesize(&cfg, records, cli.writer_model, params, seed);
    let deletes = workload.actions.iter().filter(|act| act.is_delete).count();
    info!(
        "seed {}: {} actions ({} inserts, {} deletes)",
        seed,
        workload.actions.len(),
        workload.actions.len() - deletes,
        deletes
    );

    let opts = AllocOpts {
        coalescing: cli.coalescing,
        min_fr_split_remain: Blocks(cli.min_fr_split_remain),
        max_extent_cnt: cli.max_ext_cnt,
    };
    let mut sim = Simulator::new(cfg, cli.allocator.build(cfg, &opts), workload.pool);
    if cli.trace {
        sim = sim.with_trace(Box::new(io::stdout()));
    }

    sim.run(&workload.actions);
    if cli.contract || !cli.no_contract {
        sim.contract();
    }

    let state = sim.into_final_state();

    let mut maps: Vec<&str> = cli.show_map.iter().map(String::as_str).collect();
    maps.sort();
    maps.dedup();
    for map in maps {
        match map {
            "objs" => {
                println!("Object IDs map:");
                println!("{}", render_obj_id_map(&state.space));
            }
            "types" => {
                println!("Object types map:");
                println!("{}", render_obj_type_map(&state.space, &state.objs));
            }
            "pages" => {
                println!("Pages map:");
                println!("{}", render_page_map(&state.space, &state.objs));
            }
            other => unreachable!("structopt validated the map name {}", other),
        }
    }

    println!("{}", SpaceStats::collect(&cfg, &state.space, &state.objs));

    let runs = free_runs(&state.space);
    if !runs.is_empty() {
        let mut histogram = Histogram::with_buckets(10);
        for run in runs {
            histogram.add(run as u64);
        }
        println!("Free hole sizes (blocks):");
        println!("{}", histogram);
    }
}

fn resolve_sample(name: &str) -> &str {
    SAMPLE_SHORTCUTS
        .iter()
        .find(|(shortcut, _)| *shortcut == name)
        .map(|(_, sample)| *sample)
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcuts_resolve_and_plain_names_pass_through() {
        assert_eq!(resolve_sample("lot"), "uk-02");
        assert_eq!(resolve_sample("few"), "dc-01");
        assert_eq!(resolve_sample("small"), "fo-03");
        assert_eq!(resolve_sample("ph-01"), "ph-01");
    }
}
