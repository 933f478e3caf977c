//! A decorator that probes hole sizes linearly, guided by the backend's
//! closest-hole hints, under a hard cap on extents per allocation.

use crate::allocator::Allocator;
use crate::response::{AllocRequest, DeallocRequest, HintPolicy, Response};
use crate::units::{chunkinize, kb, BlockCfg, Bytes};

/// Carves a request into extents by repeatedly asking the backend for a
/// probe-sized piece with expansion forbidden. When a probe fails, the
/// backend's hint (the largest hole that was still too small) becomes the
/// next probe size, so the very next attempt lands in a real hole. Probing
/// stops and a single expanding "last try" takes over when the probe gets
/// below one block, or when carving on would blow the extent budget.
///
/// Compared to the halving strategy this trades more backend calls for
/// near-optimal hole reuse, with `max_extent_cnt` bounding how scattered an
/// object may become.
#[derive(Debug)]
pub struct LinearAllocator<B> {
    cfg: BlockCfg,
    backend: B,
    max_extent_cnt: usize,
}

impl<B: Allocator> LinearAllocator<B> {
    pub fn new(cfg: BlockCfg, backend: B, max_extent_cnt: usize) -> LinearAllocator<B> {
        assert!(max_extent_cnt >= 1, "at least one extent per allocation");
        LinearAllocator { cfg, backend, max_extent_cnt }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Place one chunk. `probe_sz` and `ext_cnt` persist across chunks of
    /// the same allocation: the probe size a chunk settled on is where the
    /// next chunk starts, and the extent budget is shared.
    fn try_alloc_chunk(
        &mut self,
        main: &mut Response,
        chunk: Bytes,
        req_allow_expand: bool,
        probe_sz: &mut Bytes,
        ext_cnt: &mut usize,
    ) -> bool {
        let too_small_threshold = self.cfg.blk_sz();
        let mut remain = chunk;
        let mut last_try = false;

        while remain > Bytes(0) {
            if *probe_sz > remain {
                *probe_sz = remain;
            }
            if !last_try && *ext_cnt >= self.max_extent_cnt {
                main.trace(format!(
                    "extent budget spent ({} exts), last try: {} kb",
                    ext_cnt,
                    kb(remain)
                ));
                last_try = true;
                *probe_sz = remain;
            }

            let resp = self.backend.alloc(AllocRequest {
                data_sz: *probe_sz,
                allow_expand: last_try && req_allow_expand,
            });

            if resp.not_enough_space {
                if last_try {
                    main.absorb(resp, HintPolicy::Keep);
                    return false;
                }

                let hint = resp.hint_closest_free_blk_cnt.unwrap_or_default();
                let given_up = *probe_sz;
                if hint.0 > 0 {
                    *probe_sz = self.cfg.bytes(hint);
                } else {
                    // No hole left to aim at.
                    // TODO: the blind half-block step below is a placeholder;
                    // replace it with a measured backoff once no-hint probes
                    // show up in real traces.
                    *probe_sz = probe_sz.saturating_sub(Bytes(self.cfg.blk_sz().0 / 2));
                }
                main.trace(format!(
                    "probe gave up at {} kb, retrying at {} kb",
                    kb(given_up),
                    kb(*probe_sz)
                ));

                if *probe_sz < too_small_threshold
                    || remain.0 / probe_sz.0 + *ext_cnt >= self.max_extent_cnt
                {
                    main.trace(format!("probing exhausted, last try: {} kb", kb(remain)));
                    last_try = true;
                    *probe_sz = remain;
                }
            } else {
                *ext_cnt += resp.segm.len();
                // Whole blocks were placed; account for all of them so the
                // composite never over-allocates the tail.
                let covered = self.cfg.bytes(resp.segm.blk_cnt());
                remain = remain.saturating_sub(covered);
                main.absorb(resp, HintPolicy::Drop);
                last_try = false;
            }
        }

        true
    }
}

impl<B: Allocator> Allocator for LinearAllocator<B> {
    fn alloc(&mut self, req: AllocRequest) -> Response {
        let mut main = Response::default();

        if req.data_sz <= self.cfg.blk_sz() {
            main.trace("too small, no probing");
            let resp = self.backend.alloc(req);
            let failed = resp.not_enough_space;
            main.absorb(resp, if failed { HintPolicy::Keep } else { HintPolicy::Drop });
            return main;
        }

        let chunks = chunkinize(req.data_sz, self.cfg.max_extent_bytes());
        if chunks.len() > 1 {
            main.trace(format!("too large, forcibly split into {} chks", chunks.len()));
        }

        let mut probe_sz = req.data_sz;
        let mut ext_cnt = 0;
        for chk in chunks {
            if !self.try_alloc_chunk(&mut main, chk, req.allow_expand, &mut probe_sz, &mut ext_cnt) {
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
