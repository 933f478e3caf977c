//! Replays an action stream through an allocator while checking, after
//! every step, that the allocator's answers agree with a ground-truth copy
//! of the backing space.

use std::io::{self, Write};

use crate::allocator::Allocator;
use crate::extent::Segment;
use crate::object::{ObjId, ObjectPool};
use crate::response::{AllocRequest, DeallocRequest, Response};
use crate::units::{kb, BlockCfg, Blocks};
use crate::workload::Action;

/// What a finished run exposes for maps, plots and statistics.
#[derive(Debug)]
pub struct FinalState<A> {
    pub space: Vec<ObjId>,
    pub objs: ObjectPool,
    pub allocator: A,
}

/// The simulator owns the one true copy of the backing space: a block
/// array where every entry holds the id of the object stored there, or
/// zero for a free block.
///
/// Each action is played through the allocator and then cross-checked:
/// blocks an allocation claims must have been free, blocks a deallocation
/// returns must have been filled by exactly that object, and the
/// allocator's `expected_global_endix` must match the array length after
/// every expansion or contraction. Any disagreement aborts the run.
pub struct Simulator<A> {
    cfg: BlockCfg,
    allocator: A,
    space: Vec<ObjId>,
    objs: ObjectPool,
    trace_out: Option<Box<dyn Write>>,
}

impl<A: Allocator> Simulator<A> {
    pub fn new(cfg: BlockCfg, allocator: A, objs: ObjectPool) -> Simulator<A> {
        let space = vec![0; allocator.global_endix()];
        Simulator { cfg, allocator, space, objs, trace_out: None }
    }

    /// Stream one trace line per event (and the allocator's sub-traces,
    /// indented) into `out`.
    pub fn with_trace(mut self, out: Box<dyn Write>) -> Simulator<A> {
        self.trace_out = Some(out);
        self
    }

    pub fn run(&mut self, actions: &[Action]) {
        for act in actions {
            self.step(act);
        }
    }

    pub fn step(&mut self, act: &Action) {
        if act.is_delete {
            self.dealloc(act);
        } else {
            self.alloc(act);
        }
    }

    pub fn alloc(&mut self, act: &Action) {
        let len_before = self.space.len();
        let obj_id = self.object_lookup(act, false);
        let (tag, data_sz) = {
            let obj = self.objs.get(obj_id).expect("object vanished mid-action");
            (obj.tag(), obj.data_sz)
        };

        let resp = self.allocator.alloc(AllocRequest { data_sz, allow_expand: true });
        self.trace_event(
            format!("A  {} {:>3} kb {}", tag, kb(data_sz), resp.segm),
            &resp.traces,
        );

        // The simulator always allows expansion, so a decorator's last try
        // must have fired; running out of space here is a bug.
        assert!(!resp.not_enough_space, "top-level alloc ran out of space");
        assert_eq!(resp.contract_blk_space, Blocks(0), "alloc must not contract");
        assert_eq!(
            resp.segm.blk_cnt(),
            self.cfg.blocks_for(data_sz),
            "allocated blocks must round-trip the requested size"
        );

        if resp.expand_blk_space > Blocks(0) {
            self.trace_expand(&resp);
            let new_len = self.space.len() + resp.expand_blk_space.0;
            self.space.resize(new_len, 0);
        }
        assert_eq!(
            resp.expected_global_endix,
            self.space.len(),
            "allocator and simulator disagree on the space end"
        );

        self.store(obj_id, resp.segm);
        assert_eq!(self.space.len(), len_before + resp.expand_blk_space.0);
    }

    pub fn dealloc(&mut self, act: &Action) {
        let len_before = self.space.len();
        let obj_id = self.object_lookup(act, true);
        let (tag, data_sz, segm) = {
            let obj = self.objs.get(obj_id).expect("object vanished mid-action");
            let segm = obj.segm.clone().expect("checked live in object_lookup");
            (obj.tag(), obj.data_sz, segm)
        };

        let resp = self.allocator.dealloc(DeallocRequest { segm });
        self.trace_event(
            format!(" D {} {:>3} kb {}", tag, kb(data_sz), resp.segm),
            &resp.traces,
        );

        assert!(!resp.not_enough_space, "dealloc cannot run out of space");
        assert_eq!(resp.expand_blk_space, Blocks(0), "dealloc must not expand");

        self.remove(obj_id);

        if resp.contract_blk_space > Blocks(0) {
            self.trace_contract(resp.contract_blk_space, &[]);
            self.truncate(resp.contract_blk_space);
        }
        assert_eq!(
            resp.expected_global_endix,
            self.space.len(),
            "allocator and simulator disagree on the space end"
        );
        assert_eq!(self.space.len(), len_before - resp.contract_blk_space.0);
    }

    /// Ask the allocator to give up trailing free space and truncate the
    /// block array accordingly.
    pub fn contract(&mut self) {
        let len_before = self.space.len();
        let resp = self.allocator.contract();
        let traces = resp.traces.clone();
        self.trace_contract(resp.contract_blk_space, &traces);

        assert!(!resp.not_enough_space, "contract cannot run out of space");
        assert_eq!(resp.expand_blk_space, Blocks(0), "contract must not expand");

        if resp.contract_blk_space > Blocks(0) {
            self.truncate(resp.contract_blk_space);
        }
        assert_eq!(
            resp.expected_global_endix,
            self.space.len(),
            "allocator and simulator disagree on the space end"
        );
        assert_eq!(self.space.len(), len_before - resp.contract_blk_space.0);
    }

    fn truncate(&mut self, blks: Blocks) {
        assert!(self.space.len() >= blks.0, "contracting more than the space holds");
        let cut = self.space.len() - blks.0;
        assert!(
            self.space[cut..].iter().all(|&blk| blk == 0),
            "contracting trailing blocks that are still filled"
        );
        self.space.truncate(cut);
    }

    /// Stamp the object's id into the blocks of `segm`, which must all be
    /// free beforehand and filled afterwards.
    fn store(&mut self, obj_id: ObjId, segm: Segment) {
        self.chk_subspace(obj_id, &segm, false);

        self.objs
            .get_mut(obj_id)
            .expect("object vanished mid-action")
            .segm = Some(segm.clone());
        for ext in segm.extents() {
            let (startix, endix) = ext.endpoints();
            for blk in &mut self.space[startix..endix] {
                *blk = obj_id;
            }
        }

        self.chk_subspace(obj_id, &segm, true);
    }

    /// Zero the object's blocks, which must all carry its id beforehand
    /// and be free afterwards.
    fn remove(&mut self, obj_id: ObjId) {
        let segm = self
            .objs
            .get(obj_id)
            .and_then(|obj| obj.segm.clone())
            .expect("removing an object that is not live");

        self.chk_subspace(obj_id, &segm, true);

        for ext in segm.extents() {
            let (startix, endix) = ext.endpoints();
            for blk in &mut self.space[startix..endix] {
                *blk = 0;
            }
        }
        self.objs
            .get_mut(obj_id)
            .expect("object vanished mid-action")
            .segm = None;

        self.chk_subspace(obj_id, &segm, false);
    }

    /// Check one object's view of the space against the ground truth.
    ///
    /// With `is_already_allocd` the object must be live, its recorded
    /// segment must match `segm`, and every covered block must carry its
    /// id; otherwise the object must be pending and every covered block
    /// must be zero. Either way the extents must stay in bounds and
    /// pairwise disjoint, and the blocks just outside each extent must not
    /// carry the object's id, unless that boundary is shared with another
    /// extent of the same segment (contiguous extents are legal).
    fn chk_subspace(&self, obj_id: ObjId, segm: &Segment, is_already_allocd: bool) {
        let obj = self.objs.get(obj_id).expect("checking an unknown object");

        let expected_fill = if is_already_allocd {
            assert!(obj.obj_id != 0);
            let osegm = obj.segm.as_ref().expect("live object without a segment");
            assert!(!osegm.is_empty());
            assert!(!segm.is_empty());
            assert_eq!(osegm.len(), segm.len());
            for (oext, ext) in osegm.extents().iter().zip(segm.extents()) {
                assert_eq!(oext, ext, "object segment diverged from the placed one");
                assert!(ext.blk_cnt.0 > 0);
            }
            obj.obj_id
        } else {
            assert!(obj.segm.is_none(), "object unexpectedly live");
            0
        };

        let sorted = segm.sorted();
        for pair in sorted.windows(2) {
            assert!(
                pair[0].endix() <= pair[1].blk_nr,
                "segment extents overlap: {} then {}",
                pair[0],
                pair[1]
            );
        }
        let startixs: Vec<usize> = sorted.iter().map(|ext| ext.blk_nr).collect();
        let endixs: Vec<usize> = sorted.iter().map(|ext| ext.endix()).collect();

        for ext in segm.extents() {
            let (startix, endix) = ext.endpoints();
            assert!(endix <= self.space.len(), "extent {} past the space end", ext);
            assert!(
                self.space[startix..endix].iter().all(|&blk| blk == expected_fill),
                "blocks of {} do not all hold {}",
                ext,
                expected_fill
            );

            // An id right outside the extent means an overflow or underflow
            // happened, except across a boundary two extents share.
            if !startixs.contains(&endix) {
                if let Some(&blk) = self.space.get(endix) {
                    assert!(blk != obj.obj_id, "object id leaked past {}", ext);
                }
            }
            if startix > 0 && !endixs.contains(&startix) {
                assert!(
                    self.space[startix - 1] != obj.obj_id,
                    "object id leaked before {}",
                    ext
                );
            }
        }
    }

    /// Fetch the object an action refers to, checking that its liveness
    /// matches the action's direction.
    fn object_lookup(&self, act: &Action, is_delete: bool) -> ObjId {
        let obj = self.objs.get(act.obj_id).expect("action references an unknown object");
        assert_eq!(obj.obj_id, act.obj_id);
        assert!(obj.obj_id != 0);

        if is_delete {
            assert!(act.is_delete);
            let segm = obj.segm.as_ref().expect("deleting an object that is not live");
            assert!(!segm.is_empty());
            for ext in segm.extents() {
                assert!(ext.blk_cnt.0 > 0);
            }
        } else {
            assert!(!act.is_delete);
            assert!(obj.segm.is_none(), "allocating an object that is already live");
        }

        act.obj_id
    }

    fn trace_event(&mut self, line: String, subtraces: &[String]) {
        if let Some(out) = self.trace_out.as_mut() {
            let _ = writeln!(out, "{}", line);
            for sub in subtraces {
                let _ = writeln!(out, "{:48} {}", "", sub);
            }
        }
    }

    fn trace_expand(&mut self, resp: &Response) {
        let amount = resp.expand_blk_space.0;
        let len = self.space.len();
        self.trace_event(format!("E  {} expand {} -> {}", amount, len, len + amount), &[]);
    }

    fn trace_contract(&mut self, amount: Blocks, subtraces: &[String]) {
        let len = self.space.len();
        let line = format!(" R {} contract {} -> {}", amount.0, len, len - amount.0);
        self.trace_event(line, subtraces);
    }

    pub fn cfg(&self) -> &BlockCfg {
        &self.cfg
    }

    pub fn space(&self) -> &[ObjId] {
        &self.space
    }

    pub fn objects(&self) -> &ObjectPool {
        &self.objs
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn into_final_state(self) -> FinalState<A> {
        FinalState { space: self.space, objs: self.objs, allocator: self.allocator }
    }
}

/// A trace sink that tees into an in-memory buffer, for tests that compare
/// whole trace streams.
pub struct SharedTrace(pub std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

impl io::Write for SharedTrace {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
