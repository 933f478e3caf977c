//! Strongly-typed size units shared by the allocators and the simulator.

use std::ops;

macro_rules! define_unit_type {
    ( $name:ident ) => {
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl<T: Into<Self>> ops::Add<T> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: T) -> Self {
                $name(self.0 + rhs.into().0)
            }
        }

        impl<T: Into<Self>> ops::Sub<T> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: T) -> Self {
                $name(self.0 - rhs.into().0)
            }
        }
    };
}

define_unit_type!(Bytes);
define_unit_type!(Blocks);

impl ops::Shr<u32> for Bytes {
    type Output = Bytes;

    #[inline]
    fn shr(self, shift: u32) -> Bytes {
        Bytes(self.0 >> shift)
    }
}

impl Bytes {
    #[inline]
    pub fn saturating_sub(self, rhs: Bytes) -> Bytes {
        Bytes(self.0.saturating_sub(rhs.0))
    }
}

/// Immutable sizing configuration shared by every allocator and the
/// simulator. All byte/block conversions go through here so a single run
/// cannot mix block sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCfg {
    blk_sz: usize,
}

impl BlockCfg {
    pub const DEFAULT_BLK_SZ: usize = 512;

    pub fn new(blk_sz: usize) -> BlockCfg {
        assert!(blk_sz > 0, "block size must be positive");
        BlockCfg { blk_sz }
    }

    #[inline]
    pub fn blk_sz(&self) -> Bytes {
        Bytes(self.blk_sz)
    }

    /// Blocks needed to hold `data_sz` bytes. The tail block may be only
    /// partially used; the unused tail is the internal fragmentation.
    #[inline]
    pub fn blocks_for(&self, data_sz: Bytes) -> Blocks {
        assert!(data_sz.0 > 0, "cannot size an empty payload");
        Blocks((data_sz.0 + self.blk_sz - 1) / self.blk_sz)
    }

    #[inline]
    pub fn bytes(&self, blks: Blocks) -> Bytes {
        Bytes(blks.0 * self.blk_sz)
    }

    /// `data_sz` rounded up to a whole number of blocks.
    #[inline]
    pub fn block_ceil(&self, data_sz: Bytes) -> Bytes {
        self.bytes(self.blocks_for(data_sz))
    }

    /// Hard cap on a single allocation request handed to a backend. Kept a
    /// whole number of blocks so chunked requests round-trip exactly.
    #[inline]
    pub fn max_extent_bytes(&self) -> Bytes {
        Bytes(self.blk_sz << 16)
    }
}

impl Default for BlockCfg {
    fn default() -> BlockCfg {
        BlockCfg::new(BlockCfg::DEFAULT_BLK_SZ)
    }
}

/// Split `orig_sz` into chunks of at most `chk_sz` bytes, last chunk
/// holding the remainder.
pub(crate) fn chunkinize(orig_sz: Bytes, chk_sz: Bytes) -> Vec<Bytes> {
    assert!(chk_sz.0 > 0, "chunk size must be positive");
    let mut chunks = vec![chk_sz; orig_sz.0 / chk_sz.0];
    let remain = orig_sz.0 % chk_sz.0;
    if remain > 0 {
        chunks.push(Bytes(remain));
    }
    chunks
}

/// Human-oriented kilobyte rendering used by the trace stream.
pub fn kb(sz: Bytes) -> String {
    let n = sz.0 as f64 / 1024.0;
    if sz.0 > 1024 * 1024 {
        return format!("{}", n.round() as u64);
    }

    let rounded = (n * 100.0).round() / 100.0;
    if rounded == 0.0 && sz.0 > 0 {
        format!("{}", (n * 10000.0).round() / 10000.0)
    } else {
        format!("{}", rounded)
    }
}
