//! Turns an ordered object feed into the action stream of a simulated
//! writer: a copier, a note taker, or a full editor.

use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::object::{ObjId, ObjKind, ObjRecord, Object, ObjectPool};
use crate::units::{BlockCfg, Bytes};
use crate::ConfigError;

/// One step of a workload. Deletes reference an object that must be live;
/// inserts reference one that must still be pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub is_delete: bool,
    pub obj_id: ObjId,
    /// How many times the original object has been re-inserted when this
    /// action was minted.
    pub insert_generation: u32,
}

/// The editing style an action stream imitates.
///
/// - `Copier` writes every object once, in feed order.
/// - `NoteTaker` additionally shuffles overlapping windows, like someone
///   jumping back and forth while taking notes.
/// - `Editor` starts from the note taker and interleaves deletions and
///   re-insertions of slightly resized objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterModel {
    Copier,
    NoteTaker,
    Editor,
}

impl WriterModel {
    pub const NAMES: &'static [&'static str] = &["copier", "notetaker", "editor"];
}

impl FromStr for WriterModel {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<WriterModel, ConfigError> {
        match name {
            "copier" => Ok(WriterModel::Copier),
            "notetaker" => Ok(WriterModel::NoteTaker),
            "editor" => Ok(WriterModel::Editor),
            other => Err(ConfigError::UnknownWriterModel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadParams {
    /// Width of the note taker's shuffle window, in actions.
    pub note_taker_back_w: usize,
    /// Probability that the editor deletes a given object.
    pub del_prob: f64,
    /// Same, for image objects; images are deleted far less often.
    pub del_img_prob: f64,
    /// Re-inserted objects change size by a random amount drawn from
    /// `[-factor * blk_sz, factor * blk_sz]`.
    pub reinsert_chg_sz_factor: f64,
    /// When false, the editor deletes without ever re-inserting.
    pub reinsert: bool,
}

impl Default for WorkloadParams {
    fn default() -> WorkloadParams {
        WorkloadParams {
            note_taker_back_w: 12,
            del_prob: 0.8,
            del_img_prob: 0.08,
            reinsert_chg_sz_factor: 0.25,
            reinsert: true,
        }
    }
}

impl WorkloadParams {
    fn clamped(&self) -> WorkloadParams {
        WorkloadParams {
            note_taker_back_w: self.note_taker_back_w.max(4),
            del_prob: self.del_prob.max(0.0).min(0.9),
            del_img_prob: self.del_img_prob.max(0.0).min(0.9),
            reinsert_chg_sz_factor: self.reinsert_chg_sz_factor.max(0.001),
            reinsert: self.reinsert,
        }
    }
}

/// A synthesized action stream together with the objects it references.
#[derive(Debug, Clone)]
pub struct Workload {
    pub actions: Vec<Action>,
    pub pool: ObjectPool,
}

/// Build the action stream for one writer model.
///
/// Every random decision comes from one generator seeded per pass, so the
/// same `(records, model, params, seed)` always produces the same stream.
pub fn synthesize(
    cfg: &BlockCfg,
    records: &[ObjRecord],
    model: WriterModel,
    params: &WorkloadParams,
    seed: u64,
) -> Workload {
    let params = params.clamped();
    let (mut actions, mut pool) = collect(records);

    match model {
        WriterModel::Copier => {}
        WriterModel::NoteTaker => {
            shuffle_windows(&mut actions, params.note_taker_back_w, seed);
        }
        WriterModel::Editor => {
            shuffle_windows(&mut actions, params.note_taker_back_w, seed);
            interleave_edits(cfg, &mut actions, &mut pool, &params, seed);
        }
    }

    Workload { actions, pool }
}

/// One pending object and one insert action per usable feed row, in feed
/// order. Rows deriving a non-positive size still burn an id but are
/// otherwise dropped.
fn collect(records: &[ObjRecord]) -> (Vec<Action>, ObjectPool) {
    let mut pool = ObjectPool::new();
    let mut actions = Vec::with_capacity(records.len());

    for rec in records {
        let obj_id = pool.mint();
        let data_sz = rec.data_sz();
        if data_sz <= 0 {
            continue;
        }

        pool.insert(Object {
            obj_id,
            data_sz: Bytes(data_sz as usize),
            kind: rec.kind,
            page_no: rec.page_no,
            segm: None,
        });
        actions.push(Action { is_delete: false, obj_id, insert_generation: 0 });
    }

    (actions, pool)
}

/// Shuffle overlapping windows `[b, b + w)` for `b = 0, w/2, w, ...` so
/// ordering perturbations stay local.
fn shuffle_windows(actions: &mut [Action], window_w: usize, seed: u64) {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let step = window_w / 2;

    let mut begin = 0;
    while begin < actions.len() {
        let end = (begin + window_w).min(actions.len());
        actions[begin..end].shuffle(&mut rng);
        begin += step;
    }
}

/// Scan the stream left to right; each visited insert may schedule a delete
/// at a random future position and, right of that, a re-insert of a resized
/// copy under a freshly minted id.
fn interleave_edits(
    cfg: &BlockCfg,
    actions: &mut Vec<Action>,
    pool: &mut ObjectPool,
    params: &WorkloadParams,
    seed: u64,
) {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let max_jitter = (cfg.blk_sz().0 as f64 * params.reinsert_chg_sz_factor) as i64;

    let mut i = 0;
    let mut len = actions.len();
    while i < len {
        let act = actions[i];
        if act.is_delete {
            i += 1;
            continue;
        }

        let kind = pool
            .get(act.obj_id)
            .expect("action references an unknown object")
            .kind;
        let threshold = match kind {
            ObjKind::Image => params.del_img_prob,
            _ => params.del_prob,
        };
        assert!((0.0..=0.9).contains(&threshold));

        if i + 2 < len && rng.gen::<f64>() < threshold {
            // Both positions land strictly after the current action, with
            // the delete strictly before the re-insert.
            let delix = i + rng.gen_range(1..=len - i - 2);
            let reinsertix = delix + rng.gen_range(1..=len - 1 - delix);
            assert!(i < delix && delix < reinsertix && reinsertix < len);

            actions.insert(delix, Action { is_delete: true, ..act });

            if params.reinsert {
                let deleted = pool
                    .get(act.obj_id)
                    .expect("deleted action references an unknown object")
                    .clone();

                // The re-inserted object is a distinct entity: fresh id,
                // jittered size. Aliasing the old id would defeat the
                // simulator's neighbor checks.
                let obj_id = pool.mint();
                let jitter = rng.gen_range(-max_jitter..=max_jitter).max(1);
                pool.insert(Object {
                    obj_id,
                    data_sz: Bytes((deleted.data_sz.0 as i64 + jitter) as usize),
                    kind: deleted.kind,
                    page_no: deleted.page_no,
                    segm: None,
                });

                actions.insert(
                    reinsertix,
                    Action {
                        is_delete: false,
                        obj_id,
                        insert_generation: act.insert_generation + 1,
                    },
                );

                assert!(!actions[i].is_delete);
                assert!(actions[delix].is_delete);
                assert!(!actions[reinsertix].is_delete);
                assert_eq!(actions[i].obj_id, actions[delix].obj_id);
                assert!(actions[delix].obj_id != actions[reinsertix].obj_id);
            }

            len = actions.len();
        }

        i += 1;
    }
}
