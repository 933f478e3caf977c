//! The uniform allocation seam and the selectable allocator stacks.

use std::str::FromStr;

use crate::halving::HalvingAllocator;
use crate::kr::KrAllocator;
use crate::linear::LinearAllocator;
use crate::monotonic::MonotonicAllocator;
use crate::response::{AllocRequest, DeallocRequest, Response};
use crate::units::{BlockCfg, Blocks};
use crate::ConfigError;

/// The three operations every allocation strategy answers to.
///
/// Allocators own their free-space bookkeeping and their view of the space
/// end (`global_endix`); they never touch the backing blocks themselves.
pub trait Allocator {
    fn alloc(&mut self, req: AllocRequest) -> Response;
    fn dealloc(&mut self, req: DeallocRequest) -> Response;
    fn contract(&mut self) -> Response;

    /// One past the highest block this allocator ever handed out.
    fn global_endix(&self) -> usize;
}

/// The allocator stacks selectable from the command line. Decorators own
/// their backend; dispatch is a plain exhaustive match.
#[derive(Debug)]
pub enum SpaceAllocator {
    Mono(MonotonicAllocator),
    Kr(KrAllocator),
    HalvingKr(HalvingAllocator<KrAllocator>),
    LinearKr(LinearAllocator<KrAllocator>),
}

impl SpaceAllocator {
    /// The K&R allocator at the bottom of the stack, if there is one.
    pub fn kr_backend(&self) -> Option<&KrAllocator> {
        match self {
            SpaceAllocator::Mono(_) => None,
            SpaceAllocator::Kr(kr) => Some(kr),
            SpaceAllocator::HalvingKr(halving) => Some(halving.backend()),
            SpaceAllocator::LinearKr(linear) => Some(linear.backend()),
        }
    }
}

impl Allocator for SpaceAllocator {
    fn alloc(&mut self, req: AllocRequest) -> Response {
        match self {
            SpaceAllocator::Mono(inner) => inner.alloc(req),
            SpaceAllocator::Kr(inner) => inner.alloc(req),
            SpaceAllocator::HalvingKr(inner) => inner.alloc(req),
            SpaceAllocator::LinearKr(inner) => inner.alloc(req),
        }
    }

    fn dealloc(&mut self, req: DeallocRequest) -> Response {
        match self {
            SpaceAllocator::Mono(inner) => inner.dealloc(req),
            SpaceAllocator::Kr(inner) => inner.dealloc(req),
            SpaceAllocator::HalvingKr(inner) => inner.dealloc(req),
            SpaceAllocator::LinearKr(inner) => inner.dealloc(req),
        }
    }

    fn contract(&mut self) -> Response {
        match self {
            SpaceAllocator::Mono(inner) => inner.contract(),
            SpaceAllocator::Kr(inner) => inner.contract(),
            SpaceAllocator::HalvingKr(inner) => inner.contract(),
            SpaceAllocator::LinearKr(inner) => inner.contract(),
        }
    }

    fn global_endix(&self) -> usize {
        match self {
            SpaceAllocator::Mono(inner) => inner.global_endix(),
            SpaceAllocator::Kr(inner) => inner.global_endix(),
            SpaceAllocator::HalvingKr(inner) => inner.global_endix(),
            SpaceAllocator::LinearKr(inner) => inner.global_endix(),
        }
    }
}

/// Tuning knobs shared by the allocator stacks.
#[derive(Debug, Clone)]
pub struct AllocOpts {
    pub coalescing: bool,
    pub min_fr_split_remain: Blocks,
    pub max_extent_cnt: usize,
}

impl Default for AllocOpts {
    fn default() -> AllocOpts {
        AllocOpts {
            coalescing: false,
            min_fr_split_remain: Blocks(1),
            max_extent_cnt: 8,
        }
    }
}

/// Strategy names as they appear on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Mono,
    Kr,
    HalvingKr,
    LinearKr,
}

impl Strategy {
    pub const NAMES: &'static [&'static str] = &["mono", "kr", "halving-kr", "linear-kr"];

    pub fn build(self, cfg: BlockCfg, opts: &AllocOpts) -> SpaceAllocator {
        let kr = || KrAllocator::new(cfg, opts.coalescing, opts.min_fr_split_remain);
        match self {
            Strategy::Mono => SpaceAllocator::Mono(MonotonicAllocator::new(cfg)),
            Strategy::Kr => SpaceAllocator::Kr(kr()),
            Strategy::HalvingKr => SpaceAllocator::HalvingKr(HalvingAllocator::new(cfg, kr())),
            Strategy::LinearKr => {
                SpaceAllocator::LinearKr(LinearAllocator::new(cfg, kr(), opts.max_extent_cnt))
            }
        }
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Strategy, ConfigError> {
        match name {
            "mono" => Ok(Strategy::Mono),
            "kr" => Ok(Strategy::Kr),
            "halving-kr" => Ok(Strategy::HalvingKr),
            "linear-kr" => Ok(Strategy::LinearKr),
            other => Err(ConfigError::UnknownAllocator(other.to_string())),
        }
    }
}
