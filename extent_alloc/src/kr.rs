//! First-fit free-list allocation in the classic K&R style.

use crate::allocator::Allocator;
use crate::extent::{Extent, Segment};
use crate::response::{AllocRequest, DeallocRequest, Response};
use crate::units::{BlockCfg, Blocks};

/// First-fit allocator over an ordered list of free extents.
///
/// Two policies tune its behavior:
///
/// - `coalescing`: on deallocation, merge the freed extent with any free
///   neighbor whose endpoint touches it.
/// - `min_fr_split_remain`: a hole larger than a request is split only when
///   the leftover would have at least this many blocks. Tiny leftovers
///   pollute the free list, inflate every later scan and trap large
///   allocations, so they are better left unsplit.
#[derive(Debug)]
pub struct KrAllocator {
    cfg: BlockCfg,
    free_list: Vec<Extent>,
    global_endix: usize,
    coalescing: bool,
    min_fr_split_remain: Blocks,
}

impl KrAllocator {
    pub fn new(cfg: BlockCfg, coalescing: bool, min_fr_split_remain: Blocks) -> KrAllocator {
        assert!(min_fr_split_remain.0 >= 1, "the minimum split remainder is one block");
        KrAllocator {
            cfg,
            free_list: Vec::new(),
            global_endix: 0,
            coalescing,
            min_fr_split_remain,
        }
    }

    pub fn free_list(&self) -> &[Extent] {
        &self.free_list
    }

    pub fn free_blk_cnt(&self) -> Blocks {
        Blocks(self.free_list.iter().map(|fr| fr.blk_cnt.0).sum())
    }

    pub fn is_coalescing(&self) -> bool {
        self.coalescing
    }

    fn free_one(&mut self, ext: Extent, traces: &mut Vec<String>) {
        if !self.coalescing {
            // Naive append, no neighbor bookkeeping at all.
            self.free_list.push(ext);
            traces.push(format!("free added: {}", ext));
            return;
        }

        let (startix, endix) = ext.endpoints();
        self.free_list.sort();

        // At most one neighbor on each side can touch the freed extent:
        //
        //   left               right
        //   v                  v
        //   ^.......^..........^.....
        //           startix   endix
        //
        // Once the scan passes `endix` no further candidate is possible.
        let mut left = None;
        let mut right = None;
        for (i, fr) in self.free_list.iter().enumerate() {
            if fr.endix() == startix {
                left = Some(i);
            } else if fr.blk_nr == endix {
                right = Some(i);
                break;
            } else if fr.blk_nr > endix {
                break;
            }
        }

        match (left, right) {
            (None, None) => {
                self.free_list.push(ext);
                traces.push(format!("free added: {}", ext));
            }
            (Some(l), None) => {
                let fl = self.free_list[l];
                let merged = Extent::new(fl.blk_nr, fl.blk_cnt + ext.blk_cnt);
                self.free_list[l] = merged;
                traces.push(format!("free coalesced: {}", fl));
                traces.push(format!("coalesced into: {}", merged));
            }
            (None, Some(r)) => {
                let fr = self.free_list[r];
                let merged = Extent::new(startix, ext.blk_cnt + fr.blk_cnt);
                self.free_list[r] = merged;
                traces.push(format!("free coalesced: {}", fr));
                traces.push(format!("coalesced into: {}", merged));
            }
            (Some(l), Some(r)) => {
                let fl = self.free_list[l];
                let fr = self.free_list[r];
                let merged = Extent::new(fl.blk_nr, fl.blk_cnt + ext.blk_cnt + fr.blk_cnt);
                self.free_list[l] = merged;
                self.free_list.remove(r);
                traces.push(format!("free coalesced: {} {}", fl, fr));
                traces.push(format!("coalesced into: {}", merged));
            }
        }
    }
}

impl Allocator for KrAllocator {
    fn alloc(&mut self, req: AllocRequest) -> Response {
        let blk_cnt = self.cfg.blocks_for(req.data_sz);

        // First fit, while remembering the largest hole that was still too
        // small. That size is handed back as a hint when the request fails.
        let mut closest_free_blk_cnt = Blocks(0);
        for i in 0..self.free_list.len() {
            let fr = self.free_list[i];
            assert!(fr.blk_cnt.0 > 0, "empty extent in the free list");
            assert!(fr.endix() <= self.global_endix, "free extent past the space end");

            if fr.blk_cnt == blk_cnt {
                // Perfect fit, unlink from the free list.
                self.free_list.remove(i);
                let mut resp = Response::placed(
                    Extent::new(fr.blk_nr, blk_cnt).into(),
                    Blocks(0),
                    self.global_endix,
                );
                resp.trace(format!("perfect free used: {}", fr));
                return resp;
            }

            if fr.blk_cnt > blk_cnt && fr.blk_cnt - blk_cnt >= self.min_fr_split_remain {
                // Good enough fit: assign the prefix and advance the free
                // extent in place.
                let remain = Extent::new(fr.blk_nr + blk_cnt.0, fr.blk_cnt - blk_cnt);
                self.free_list[i] = remain;
                let mut resp = Response::placed(
                    Extent::new(fr.blk_nr, blk_cnt).into(),
                    Blocks(0),
                    self.global_endix,
                );
                resp.trace(format!("split free, remain: {}", remain));
                return resp;
            }

            if fr.blk_cnt < blk_cnt {
                closest_free_blk_cnt = closest_free_blk_cnt.max(fr.blk_cnt);
            }
        }

        if req.allow_expand {
            // No fit at all, claim fresh space at the top.
            let segm: Segment = Extent::new(self.global_endix, blk_cnt).into();
            self.global_endix += blk_cnt.0;
            Response::placed(segm, blk_cnt, self.global_endix)
        } else {
            Response::exhausted(self.global_endix, closest_free_blk_cnt)
        }
    }

    fn dealloc(&mut self, req: DeallocRequest) -> Response {
        let mut traces = Vec::new();
        for ext in req.segm.extents() {
            self.free_one(*ext, &mut traces);
        }

        let mut resp = Response::released(req.segm, self.global_endix);
        resp.traces = traces;
        resp
    }

    fn contract(&mut self) -> Response {
        self.free_list.sort();

        let mut released = Blocks(0);
        while let Some(last) = self.free_list.last().copied() {
            if last.endix() == self.global_endix {
                self.global_endix = last.blk_nr;
                released = released + last.blk_cnt;
                self.free_list.pop();
            } else {
                assert!(last.endix() < self.global_endix, "free extent past the space end");
                break;
            }
        }

        Response::contracted(released, self.global_endix)
    }

    fn global_endix(&self) -> usize {
        self.global_endix
    }
}
