//! A decorator that shrinks large requests by powers of two so the backend
//! can satisfy them from existing holes instead of growing the space.

use crate::allocator::Allocator;
use crate::response::{AllocRequest, DeallocRequest, HintPolicy, Response};
use crate::units::{chunkinize, kb, BlockCfg, Bytes};

/// Past this many halvings the sub-chunk size would underflow; give up and
/// fall back to one expanding request.
const MAX_HALVING_ORDER: u32 = 31;

/// Splits a request into sub-chunks of `remain >> halving_order` bytes and
/// offers each to the backend with expansion forbidden. Every time the
/// backend runs out of holes the order goes up and the still-unallocated
/// bytes are re-chunked at half the size. Once sub-chunks would drop below
/// one block, the remainder is allocated in a single expanding "last try".
///
/// The order never decreases within one allocation: a coarser split already
/// failed, so later chunks start where earlier chunks left off.
#[derive(Debug)]
pub struct HalvingAllocator<B> {
    cfg: BlockCfg,
    backend: B,
}

impl<B: Allocator> HalvingAllocator<B> {
    pub fn new(cfg: BlockCfg, backend: B) -> HalvingAllocator<B> {
        HalvingAllocator { cfg, backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Sub-chunk size for the given order, rounded up to whole blocks so a
    /// chunked allocation consumes exactly as many blocks as a direct one.
    fn sub_chunk_sz(&self, remain: Bytes, halving_order: u32) -> Bytes {
        self.cfg.block_ceil((remain >> halving_order).max(Bytes(1)))
    }

    fn try_alloc_without_expand(
        &mut self,
        main: &mut Response,
        data_sz: Bytes,
        too_small_threshold: Bytes,
        req_allow_expand: bool,
        mut halving_order: u32,
    ) -> u32 {
        let mut remain = data_sz;

        let (mut chunks, mut last_try) = if (remain >> halving_order) < too_small_threshold {
            (vec![remain], true)
        } else {
            (chunkinize(remain, self.sub_chunk_sz(remain, halving_order)), false)
        };

        while remain > Bytes(0) {
            main.trace(format!(
                "halved {} times: {} chks remains, sizes {} kb & {} kb",
                halving_order,
                chunks.len(),
                kb(chunks[0]),
                kb(*chunks.last().expect("chunk list cannot be empty")),
            ));

            for chk in std::mem::take(&mut chunks) {
                let resp = self.backend.alloc(AllocRequest {
                    data_sz: chk,
                    allow_expand: last_try && req_allow_expand,
                });

                if resp.not_enough_space && !last_try && req_allow_expand {
                    if (remain >> halving_order) < too_small_threshold
                        || halving_order == MAX_HALVING_ORDER
                    {
                        // Halving further would produce sub-block crumbs;
                        // allocate whatever is left in one expanding shot.
                        chunks = vec![remain];
                        last_try = true;
                    } else {
                        halving_order += 1;
                        chunks = chunkinize(remain, self.sub_chunk_sz(remain, halving_order));
                    }
                    break;
                }

                let failed = resp.not_enough_space;
                main.absorb(resp, if failed { HintPolicy::Keep } else { HintPolicy::Drop });
                if failed {
                    // The last try itself ran out of space; this is terminal.
                    return halving_order;
                }
                remain = remain - chk;
            }
        }

        halving_order
    }
}

impl<B: Allocator> Allocator for HalvingAllocator<B> {
    fn alloc(&mut self, req: AllocRequest) -> Response {
        let mut main = Response::default();

        if req.data_sz <= self.cfg.blk_sz() {
            main.trace("too small, no split");
            let resp = self.backend.alloc(req);
            let failed = resp.not_enough_space;
            main.absorb(resp, if failed { HintPolicy::Keep } else { HintPolicy::Drop });
            return main;
        }

        // Way beyond what one extent may span: force an outer split first.
        let chunks = chunkinize(req.data_sz, self.cfg.max_extent_bytes());
        if chunks.len() > 1 {
            main.trace(format!("too large, forcibly split into {} chks", chunks.len()));
        }

        let mut halving_order = 0;
        for chk in chunks {
            halving_order = self.try_alloc_without_expand(
                &mut main,
                chk,
                self.cfg.blk_sz(),
                req.allow_expand,
                halving_order,
            );

            if main.not_enough_space {
                return main;
            }
        }

        main
    }

    fn dealloc(&mut self, req: DeallocRequest) -> Response {
        self.backend.dealloc(req)
    }

    fn contract(&mut self) -> Response {
        self.backend.contract()
    }

    fn global_endix(&self) -> usize {
        self.backend.global_endix()
    }
}
