//! Extents and segments: the units of block placement.

use std::fmt;

use crate::units::{BlockCfg, Blocks, Bytes};

/// A contiguous run of blocks, covering `[blk_nr, blk_nr + blk_cnt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Extent {
    pub blk_nr: usize,
    pub blk_cnt: Blocks,
}

impl Extent {
    pub fn new(blk_nr: usize, blk_cnt: Blocks) -> Extent {
        assert!(blk_cnt.0 > 0, "an extent cannot be empty");
        Extent { blk_nr, blk_cnt }
    }

    /// One past the last block of the run.
    #[inline]
    pub fn endix(&self) -> usize {
        self.blk_nr + self.blk_cnt.0
    }

    #[inline]
    pub fn endpoints(&self) -> (usize, usize) {
        (self.blk_nr, self.endix())
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:05x} {:05x} [{:4}]", self.blk_nr, self.endix(), self.blk_cnt.0)
    }
}

/// The ordered list of extents owned by one object.
///
/// A placed segment is never empty and its extents, once sorted by
/// `blk_nr`, never overlap each other. Responses under construction use an
/// empty segment as the accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    extents: Vec<Extent>,
}

impl Segment {
    pub fn new() -> Segment {
        Segment { extents: Vec::new() }
    }

    pub fn from_extents(extents: Vec<Extent>) -> Segment {
        Segment { extents }
    }

    /// A single extent at `blk_nr`, sized to hold `data_sz` bytes.
    pub fn sized_for(cfg: &BlockCfg, data_sz: Bytes, blk_nr: usize) -> Segment {
        Extent::new(blk_nr, cfg.blocks_for(data_sz)).into()
    }

    pub fn push(&mut self, ext: Extent) {
        self.extents.push(ext);
    }

    pub fn extend(&mut self, other: Segment) {
        self.extents.extend(other.extents);
    }

    #[inline]
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Total number of blocks across all extents.
    pub fn blk_cnt(&self) -> Blocks {
        Blocks(self.extents.iter().map(|ext| ext.blk_cnt.0).sum())
    }

    /// The extents ordered by starting block.
    pub fn sorted(&self) -> Vec<Extent> {
        let mut extents = self.extents.clone();
        extents.sort();
        extents
    }

    /// True when the sorted extents are pairwise non-overlapping.
    pub fn is_disjoint(&self) -> bool {
        self.sorted()
            .windows(2)
            .all(|pair| pair[0].endix() <= pair[1].blk_nr)
    }
}

impl From<Extent> for Segment {
    fn from(ext: Extent) -> Segment {
        Segment { extents: vec![ext] }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "exts: {:2} {{", self.extents.len())?;
        for (i, ext) in self.extents.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ext)?;
        }
        write!(f, "}}")
    }
}
