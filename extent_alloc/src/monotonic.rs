//! Append-only allocation: the fastest possible baseline.

use crate::allocator::Allocator;
use crate::extent::Segment;
use crate::response::{AllocRequest, DeallocRequest, Response};
use crate::units::{BlockCfg, Blocks};

/// Always allocates at the top of the space and never reuses a block.
/// Deallocation is a no-op and contraction never releases anything.
#[derive(Debug)]
pub struct MonotonicAllocator {
    cfg: BlockCfg,
    global_endix: usize,
}

impl MonotonicAllocator {
    pub fn new(cfg: BlockCfg) -> MonotonicAllocator {
        MonotonicAllocator { cfg, global_endix: 0 }
    }
}

impl Allocator for MonotonicAllocator {
    fn alloc(&mut self, req: AllocRequest) -> Response {
        if !req.allow_expand {
            // Growing is the only trick this allocator knows.
            return Response::exhausted(self.global_endix, Blocks(0));
        }

        let segm = Segment::sized_for(&self.cfg, req.data_sz, self.global_endix);
        let blk_cnt = segm.blk_cnt();
        self.global_endix += blk_cnt.0;

        Response::placed(segm, blk_cnt, self.global_endix)
    }

    fn dealloc(&mut self, req: DeallocRequest) -> Response {
        Response::released(req.segm, self.global_endix)
    }

    fn contract(&mut self) -> Response {
        Response::contracted(Blocks(0), self.global_endix)
    }

    fn global_endix(&self) -> usize {
        self.global_endix
    }
}
