//! End-to-end checks for the allocator stacks: synthesized workloads are
//! replayed through the simulator, whose ground-truth block array is the
//! oracle, and the final state is audited once more from the outside.

use std::cell::RefCell;
use std::rc::Rc;

use quickcheck::{Arbitrary, Gen};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use extent_alloc::{
    synthesize, Action, AllocOpts, AllocRequest, Allocator, BlockCfg, Blocks, Bytes, DeallocRequest,
    FinalState, ObjKind, ObjRecord, Object, ObjectPool, SharedTrace, Simulator, SpaceAllocator,
    SpaceStats, Strategy, WorkloadParams, WriterModel,
};

const BLK_SZ: usize = 512;

fn cfg() -> BlockCfg {
    BlockCfg::new(BLK_SZ)
}

fn text_records(sizes: &[usize]) -> Vec<ObjRecord> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, sz)| {
            // A sprinkle of image objects exercises the separate deletion
            // probability; their derived size only approximates `sz`,
            // which none of the checks depend on.
            if i % 5 == 4 {
                ObjRecord {
                    kind: ObjKind::Image,
                    char_length: (*sz as f64 * 1.33) as i64,
                    widths_cnt: 0,
                    coords_cnt: 0,
                    inline_text: String::new(),
                    page_no: (i / 10) as u32,
                }
            } else {
                ObjRecord {
                    kind: ObjKind::Text,
                    char_length: *sz as i64,
                    widths_cnt: 0,
                    coords_cnt: 0,
                    inline_text: String::new(),
                    page_no: (i / 10) as u32,
                }
            }
        })
        .collect()
}

fn pool_of(sizes: &[usize]) -> ObjectPool {
    let mut pool = ObjectPool::new();
    for sz in sizes {
        let obj_id = pool.mint();
        pool.insert(Object {
            obj_id,
            data_sz: Bytes(*sz),
            kind: ObjKind::Text,
            page_no: 0,
            segm: None,
        });
    }
    pool
}

fn insert(obj_id: u32) -> Action {
    Action { is_delete: false, obj_id, insert_generation: 0 }
}

fn delete(obj_id: u32) -> Action {
    Action { is_delete: true, obj_id, insert_generation: 0 }
}

/// Audit a finished run against the universal invariants: every stamped
/// block belongs to exactly the live object covering it, every live
/// segment is fully stamped and mass-conserving, and a surviving K&R free
/// list only describes holes that really are free.
fn check_final_state(cfg: &BlockCfg, state: &FinalState<SpaceAllocator>) {
    for (ix, &blk) in state.space.iter().enumerate() {
        if blk == 0 {
            continue;
        }
        let obj = state.objs.get(blk).expect("stamped block of an unknown object");
        let segm = obj.segm.as_ref().expect("stamped block of a dead object");
        assert!(
            segm.extents().iter().any(|ext| ext.blk_nr <= ix && ix < ext.endix()),
            "block {} stamped {} but no extent covers it",
            ix,
            blk
        );
    }

    for obj in state.objs.iter().filter(|obj| obj.is_live()) {
        let segm = obj.segm.as_ref().expect("filtered on live");
        assert!(segm.is_disjoint());

        let reserved = cfg.bytes(segm.blk_cnt());
        assert!(reserved.0 >= obj.data_sz.0, "object {} under-allocated", obj.obj_id);
        assert!(
            reserved.0 < obj.data_sz.0 + cfg.blk_sz().0,
            "object {} over-allocated",
            obj.obj_id
        );

        for ext in segm.extents() {
            for ix in ext.blk_nr..ext.endix() {
                assert_eq!(state.space[ix], obj.obj_id);
            }
        }
    }

    assert_eq!(state.allocator.global_endix(), state.space.len());

    if let Some(kr) = state.allocator.kr_backend() {
        let mut free = kr.free_list().to_vec();
        free.sort();
        for pair in free.windows(2) {
            assert!(pair[0].endix() <= pair[1].blk_nr, "free extents overlap");
            if kr.is_coalescing() {
                assert!(
                    pair[0].endix() < pair[1].blk_nr,
                    "coalescing left adjacent free extents unmerged"
                );
            }
        }
        for fr in &free {
            assert!(fr.endix() <= state.space.len(), "free extent past the space end");
            for ix in fr.blk_nr..fr.endix() {
                assert_eq!(state.space[ix], 0, "free extent covers a filled block");
            }
        }
    }
}

fn run_workload(
    strategy: Strategy,
    model: WriterModel,
    sizes: &[usize],
    seed: u64,
    opts: &AllocOpts,
    contract: bool,
) -> FinalState<SpaceAllocator> {
    let cfg = cfg();
    let workload = synthesize(&cfg, &text_records(sizes), model, &WorkloadParams::default(), seed);

    let mut sim = Simulator::new(cfg, strategy.build(cfg, opts), workload.pool);
    sim.run(&workload.actions);
    if contract {
        sim.contract();
    }

    let state = sim.into_final_state();
    check_final_state(&cfg, &state);
    state
}

fn sizes_from_seed(seed: u64, count: usize) -> Vec<usize> {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            if rng.gen_ratio(1, 10) {
                rng.gen_range(1..=16 * BLK_SZ)
            } else {
                rng.gen_range(1..=2 * BLK_SZ)
            }
        })
        .collect()
}

macro_rules! editor_workload_tests {
    ( $( $name:ident => $strategy:expr, $coalescing:expr; )* ) => {
        $(
            #[test]
            fn $name() {
                let opts = AllocOpts { coalescing: $coalescing, ..AllocOpts::default() };
                for seed in &[31416, 27183, 16180] {
                    let sizes = sizes_from_seed(*seed, 120);
                    run_workload($strategy, WriterModel::Editor, &sizes, *seed, &opts, true);
                }
            }
        )*
    };
}

editor_workload_tests! {
    editor_under_mono => Strategy::Mono, false;
    editor_under_kr => Strategy::Kr, false;
    editor_under_kr_coalescing => Strategy::Kr, true;
    editor_under_halving_kr => Strategy::HalvingKr, false;
    editor_under_halving_kr_coalescing => Strategy::HalvingKr, true;
    editor_under_linear_kr => Strategy::LinearKr, false;
    editor_under_linear_kr_coalescing => Strategy::LinearKr, true;
}

#[test]
fn copier_and_notetaker_also_hold() {
    for model in &[WriterModel::Copier, WriterModel::NoteTaker] {
        for strategy in &[Strategy::Mono, Strategy::Kr, Strategy::HalvingKr, Strategy::LinearKr] {
            let sizes = sizes_from_seed(99, 80);
            run_workload(*strategy, *model, &sizes, 99, &AllocOpts::default(), true);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct SimCase {
    sizes: Vec<usize>,
    seed: u64,
    strategy: Strategy,
    model: WriterModel,
    coalescing: bool,
    min_fr_split_remain: usize,
    max_extent_cnt: usize,
}

impl Arbitrary for SimCase {
    fn arbitrary(g: &mut Gen) -> SimCase {
        let count = usize::arbitrary(g) % 50 + 1;
        let sizes = (0..count)
            .map(|_| {
                if usize::arbitrary(g) % 10 == 0 {
                    usize::arbitrary(g) % (16 * BLK_SZ) + 1
                } else {
                    usize::arbitrary(g) % (2 * BLK_SZ) + 1
                }
            })
            .collect();

        SimCase {
            sizes,
            seed: u64::arbitrary(g),
            strategy: *g
                .choose(&[Strategy::Mono, Strategy::Kr, Strategy::HalvingKr, Strategy::LinearKr])
                .expect("non-empty"),
            model: *g
                .choose(&[WriterModel::Copier, WriterModel::NoteTaker, WriterModel::Editor])
                .expect("non-empty"),
            coalescing: bool::arbitrary(g),
            min_fr_split_remain: usize::arbitrary(g) % 4 + 1,
            max_extent_cnt: usize::arbitrary(g) % 8 + 1,
        }
    }
}

fn simulation_holds_invariants(case: SimCase) -> bool {
    let opts = AllocOpts {
        coalescing: case.coalescing,
        min_fr_split_remain: Blocks(case.min_fr_split_remain),
        max_extent_cnt: case.max_extent_cnt,
    };
    run_workload(case.strategy, case.model, &case.sizes, case.seed, &opts, true);
    true
}

#[test]
fn quickcheck_simulations() {
    quickcheck::QuickCheck::new()
        .tests(40)
        .quickcheck(simulation_holds_invariants as fn(SimCase) -> bool);
}

////////////////////////////////////////////////////////////////////////////////
// Concrete scenarios.

#[test]
fn monotonic_space_layout() {
    let cfg = cfg();
    let mut sim = Simulator::new(
        cfg,
        Strategy::Mono.build(cfg, &AllocOpts::default()),
        pool_of(&[300, 700, 1000]),
    );
    sim.run(&[insert(1), insert(2), insert(3)]);

    assert_eq!(sim.space(), &[1, 2, 2, 3, 3]);
}

#[test]
fn kr_reuses_a_perfect_hole() {
    let cfg = cfg();
    let mut sim = Simulator::new(
        cfg,
        Strategy::Kr.build(cfg, &AllocOpts::default()),
        pool_of(&[1024, 512, 512, 512]),
    );
    sim.run(&[insert(1), insert(2), insert(3), delete(2), insert(4)]);

    assert_eq!(sim.space(), &[1, 1, 4, 3]);
}

#[test]
fn kr_coalesces_around_the_survivor_and_contracts_to_nothing() {
    let cfg = cfg();
    let opts = AllocOpts { coalescing: true, ..AllocOpts::default() };
    let mut sim = Simulator::new(cfg, Strategy::Kr.build(cfg, &opts), pool_of(&[1024, 512, 512, 512]));

    sim.run(&[insert(1), insert(2), insert(3), delete(2), insert(4)]);
    sim.run(&[delete(1), delete(3)]);
    {
        let kr = sim.allocator().kr_backend().expect("kr stack");
        let free = kr.free_list();
        assert_eq!(free.len(), 2, "the live survivor keeps the holes apart");
        assert_eq!(kr.free_blk_cnt(), Blocks(3));
    }

    // Freeing the survivor merges everything into one 4-block extent.
    sim.run(&[delete(4)]);
    {
        let kr = sim.allocator().kr_backend().expect("kr stack");
        assert_eq!(kr.free_list().len(), 1);
        assert_eq!(kr.free_blk_cnt(), Blocks(4));
    }

    sim.contract();
    assert!(sim.space().is_empty());
    assert_eq!(sim.allocator().global_endix(), 0);
}

#[test]
fn halving_fills_two_holes_before_expanding() {
    let cfg = cfg();
    let opts = AllocOpts::default();
    let mut sim = Simulator::new(
        cfg,
        Strategy::HalvingKr.build(cfg, &opts),
        pool_of(&[2048, 3072, 2048, 2048, 8192]),
    );

    sim.run(&[insert(1), insert(2), insert(3), insert(4)]);
    sim.run(&[delete(1), delete(3)]);
    assert_eq!(sim.space().len(), 18);

    // Holes at [0, 4) and [10, 14); the 16-block request must consume both
    // and expand only for the remaining 8 blocks.
    sim.run(&[insert(5)]);
    assert_eq!(sim.space().len(), 26);

    let segm = sim
        .objects()
        .get(5)
        .and_then(|obj| obj.segm.clone())
        .expect("object 5 is live");
    let placed = segm.sorted();
    assert_eq!(placed[0].endpoints(), (0, 4));
    assert_eq!(placed[1].endpoints(), (10, 14));
    assert_eq!(placed[2].endpoints(), (18, 26));

    let kr = sim.allocator().kr_backend().expect("kr stack");
    assert!(kr.free_list().is_empty());
}

#[test]
fn linear_probe_lands_in_both_holes_without_expanding() {
    let cfg = cfg();
    let opts = AllocOpts { max_extent_cnt: 2, ..AllocOpts::default() };
    let mut sim = Simulator::new(
        cfg,
        Strategy::LinearKr.build(cfg, &opts),
        pool_of(&[2048, 3072, 1024, 3072]),
    );

    sim.run(&[insert(1), insert(2), insert(3)]);
    sim.run(&[delete(1), delete(3)]);
    assert_eq!(sim.space().len(), 12);

    // Holes of 4 and 2 blocks; the 6-block request must split across them
    // exactly, leaving the space length untouched.
    sim.run(&[insert(4)]);
    assert_eq!(sim.space().len(), 12);

    let segm = sim
        .objects()
        .get(4)
        .and_then(|obj| obj.segm.clone())
        .expect("object 4 is live");
    assert_eq!(segm.sorted().len(), 2);
    assert_eq!(segm.sorted()[0].endpoints(), (0, 4));
    assert_eq!(segm.sorted()[1].endpoints(), (10, 12));
}

////////////////////////////////////////////////////////////////////////////////
// Boundary cases.

#[test]
fn single_byte_block_sized_and_block_plus_one_objects() {
    for strategy in &[Strategy::Mono, Strategy::Kr, Strategy::HalvingKr, Strategy::LinearKr] {
        let cfg = cfg();
        let mut sim = Simulator::new(
            cfg,
            strategy.build(cfg, &AllocOpts::default()),
            pool_of(&[1, BLK_SZ, BLK_SZ + 1]),
        );
        sim.run(&[insert(1), insert(2), insert(3)]);

        assert_eq!(sim.space(), &[1, 2, 3, 3]);
    }
}

#[test]
fn deleting_the_most_recent_allocation_and_contracting() {
    let cfg = cfg();
    let mut sim = Simulator::new(
        cfg,
        Strategy::Kr.build(cfg, &AllocOpts::default()),
        pool_of(&[512, 1024]),
    );
    sim.run(&[insert(1), insert(2), delete(2)]);

    sim.contract();
    assert_eq!(sim.space(), &[1]);
    assert_eq!(sim.allocator().global_endix(), 1);
}

#[test]
fn deleting_everything_and_contracting_empties_the_space() {
    for coalescing in &[false, true] {
        let cfg = cfg();
        let opts = AllocOpts { coalescing: *coalescing, ..AllocOpts::default() };
        let mut sim = Simulator::new(
            cfg,
            Strategy::Kr.build(cfg, &opts),
            pool_of(&[700, 1500, 512, 3000]),
        );
        sim.run(&[insert(1), insert(2), insert(3), insert(4)]);
        sim.run(&[delete(3), delete(1), delete(4), delete(2)]);

        sim.contract();
        assert!(sim.space().is_empty());
        assert_eq!(sim.allocator().global_endix(), 0);
    }
}

#[test]
fn a_request_one_block_short_of_every_hole_hints_the_largest() {
    let cfg = cfg();
    let mut kr = extent_alloc::KrAllocator::new(cfg, false, Blocks(1));

    let a = kr.alloc(AllocRequest { data_sz: Bytes(2 * BLK_SZ), allow_expand: true });
    let b = kr.alloc(AllocRequest { data_sz: Bytes(BLK_SZ), allow_expand: true });
    let c = kr.alloc(AllocRequest { data_sz: Bytes(3 * BLK_SZ), allow_expand: true });
    kr.dealloc(DeallocRequest { segm: a.segm });
    kr.dealloc(DeallocRequest { segm: c.segm });

    let resp = kr.alloc(AllocRequest { data_sz: Bytes(4 * BLK_SZ), allow_expand: false });
    assert!(resp.not_enough_space);
    assert_eq!(resp.hint_closest_free_blk_cnt, Some(Blocks(3)));

    let _ = b;
}

////////////////////////////////////////////////////////////////////////////////
// Determinism and monotonicity.

#[test]
fn identical_seeds_reproduce_space_traces_and_stats() {
    let sizes = sizes_from_seed(7, 100);
    let cfg = cfg();
    let opts = AllocOpts { coalescing: true, ..AllocOpts::default() };

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let workload =
            synthesize(&cfg, &text_records(&sizes), WriterModel::Editor, &WorkloadParams::default(), 31416);
        let buf = Rc::new(RefCell::new(Vec::new()));
        let mut sim = Simulator::new(cfg, Strategy::HalvingKr.build(cfg, &opts), workload.pool)
            .with_trace(Box::new(SharedTrace(Rc::clone(&buf))));
        sim.run(&workload.actions);
        sim.contract();

        let state = sim.into_final_state();
        let stats = SpaceStats::collect(&cfg, &state.space, &state.objs).to_string();
        let trace = buf.borrow().clone();
        outcomes.push((state.space, trace, stats));
    }

    assert_eq!(outcomes[0].0, outcomes[1].0, "block arrays diverged");
    assert_eq!(outcomes[0].1, outcomes[1].1, "trace streams diverged");
    assert_eq!(outcomes[0].2, outcomes[1].2, "statistics diverged");
}

#[test]
fn monotonic_allocations_always_start_at_the_old_end() {
    let cfg = cfg();
    let mut mono = extent_alloc::MonotonicAllocator::new(cfg);

    let mut rng = XorShiftRng::seed_from_u64(5);
    let mut prev_endix = 0;
    for _ in 0..200 {
        let data_sz = rng.gen_range(1..=4 * BLK_SZ);
        let resp = mono.alloc(AllocRequest { data_sz: Bytes(data_sz), allow_expand: true });
        let ext = resp.segm.extents()[0];
        assert_eq!(ext.blk_nr, prev_endix, "allocation did not start at the old end");
        assert!(mono.global_endix() >= prev_endix, "the end index went backwards");
        prev_endix = mono.global_endix();
    }
}

#[test]
fn decorator_block_counts_round_trip_the_request() {
    let cfg = cfg();
    for strategy in &[Strategy::HalvingKr, Strategy::LinearKr] {
        let mut alloc = strategy.build(cfg, &AllocOpts::default());
        let mut rng = XorShiftRng::seed_from_u64(11);

        let mut live = Vec::new();
        for round in 0..300 {
            if !live.is_empty() && rng.gen_ratio(2, 5) {
                let ix = rng.gen_range(0..live.len());
                let segm = live.swap_remove(ix);
                alloc.dealloc(DeallocRequest { segm });
                continue;
            }

            let data_sz = Bytes(rng.gen_range(1..=12 * BLK_SZ));
            let resp = alloc.alloc(AllocRequest { data_sz, allow_expand: true });
            assert!(!resp.not_enough_space, "round {}: top-level alloc failed", round);
            assert_eq!(
                resp.segm.blk_cnt(),
                cfg.blocks_for(data_sz),
                "round {}: composite response lost or gained blocks",
                round
            );
            live.push(resp.segm);
        }
    }
}
