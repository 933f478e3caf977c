//! Request/response value types exchanged with the allocators.

use crate::extent::Segment;
use crate::units::{Blocks, Bytes};

#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    pub data_sz: Bytes,
    /// When false the allocator must place the request entirely inside
    /// existing holes or report `not_enough_space`.
    pub allow_expand: bool,
}

#[derive(Debug, Clone)]
pub struct DeallocRequest {
    pub segm: Segment,
}

/// Which side's hints survive when two responses are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintPolicy {
    Keep,
    Drop,
}

/// Outcome of one allocator operation.
///
/// `expected_global_endix` is the allocator's post-operation view of the
/// space end; the simulator asserts it against its own block array after
/// applying any expansion or contraction.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub segm: Segment,
    /// Trailing blocks the caller must append to the backing space.
    pub expand_blk_space: Blocks,
    /// Trailing blocks the caller may drop from the backing space.
    pub contract_blk_space: Blocks,
    pub expected_global_endix: usize,
    /// Expected failure value, only meaningful under `allow_expand = false`.
    pub not_enough_space: bool,
    /// On failure, the largest hole that was still too small (zero blocks
    /// when the free list held no hole at all).
    pub hint_closest_free_blk_cnt: Option<Blocks>,
    /// Renderable allocator-internal events, replayed indented under the
    /// simulator's own trace line.
    pub traces: Vec<String>,
}

impl Response {
    /// A successful placement.
    pub fn placed(segm: Segment, expand_blk_space: Blocks, expected_global_endix: usize) -> Response {
        Response {
            segm,
            expand_blk_space,
            expected_global_endix,
            ..Response::default()
        }
    }

    /// No hole fits and expansion was not allowed.
    pub fn exhausted(expected_global_endix: usize, hint_closest_free_blk_cnt: Blocks) -> Response {
        Response {
            expected_global_endix,
            not_enough_space: true,
            hint_closest_free_blk_cnt: Some(hint_closest_free_blk_cnt),
            ..Response::default()
        }
    }

    /// The segment handed back by a deallocation.
    pub fn released(segm: Segment, expected_global_endix: usize) -> Response {
        Response {
            segm,
            expected_global_endix,
            ..Response::default()
        }
    }

    /// Trailing space given up by a contraction.
    pub fn contracted(contract_blk_space: Blocks, expected_global_endix: usize) -> Response {
        Response {
            contract_blk_space,
            expected_global_endix,
            ..Response::default()
        }
    }

    pub fn trace(&mut self, line: impl Into<String>) {
        self.traces.push(line.into());
    }

    /// Fold a backend response into this composite one: extents and traces
    /// concatenate, the counters and the expected space end take the
    /// maximum, failure is sticky, and hints survive only under
    /// `HintPolicy::Keep` (the freshest hint wins).
    pub fn absorb(&mut self, resp: Response, hints: HintPolicy) {
        let Response {
            segm,
            expand_blk_space,
            contract_blk_space,
            expected_global_endix,
            not_enough_space,
            hint_closest_free_blk_cnt,
            traces,
        } = resp;

        self.segm.extend(segm);
        self.expand_blk_space = self.expand_blk_space.max(expand_blk_space);
        self.contract_blk_space = self.contract_blk_space.max(contract_blk_space);
        self.expected_global_endix = self.expected_global_endix.max(expected_global_endix);
        self.not_enough_space |= not_enough_space;
        if hints == HintPolicy::Keep && hint_closest_free_blk_cnt.is_some() {
            self.hint_closest_free_blk_cnt = hint_closest_free_blk_cnt;
        }
        self.traces.extend(traces);
    }
}
