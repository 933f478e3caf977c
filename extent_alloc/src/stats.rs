//! Fragmentation statistics and per-block map renderings computed from a
//! finished run's final state.

use std::fmt;

use crate::object::{ObjId, ObjectPool};
use crate::units::{kb, BlockCfg, Bytes};

/// Aggregate view of the space after a run.
#[derive(Debug, Clone)]
pub struct SpaceStats {
    pub total_blk_cnt: usize,
    pub non_free_blk_cnt: usize,
    pub free_blk_cnt: usize,
    /// Length of the run of free blocks at the very end of the space.
    pub free_blk_at_end_cnt: usize,
    pub total_file_sz: Bytes,
    /// Bytes of live object data.
    pub total_data_sz: Bytes,
    /// Reserved-but-unused bytes in the tail blocks of live segments.
    pub internal_frag_sz: Bytes,
    /// Blocks taken by object descriptors packed into shared stream blocks.
    pub desc_blk_cnt: usize,
}

impl SpaceStats {
    pub fn collect(cfg: &BlockCfg, space: &[ObjId], objs: &ObjectPool) -> SpaceStats {
        let total_data_sz = Bytes(
            objs.iter()
                .filter(|obj| obj.is_live())
                .map(|obj| obj.data_sz.0)
                .sum(),
        );

        let total_blk_cnt = space.len();
        let non_free_blk_cnt = space.iter().filter(|&&blk| blk != 0).count();
        let free_blk_cnt = total_blk_cnt - non_free_blk_cnt;
        let free_blk_at_end_cnt = space.iter().rev().take_while(|&&blk| blk == 0).count();

        let reserved = cfg.blk_sz().0 * non_free_blk_cnt;
        assert!(
            reserved >= total_data_sz.0,
            "live data cannot exceed the blocks reserved for it"
        );

        SpaceStats {
            total_blk_cnt,
            non_free_blk_cnt,
            free_blk_cnt,
            free_blk_at_end_cnt,
            total_file_sz: Bytes(cfg.blk_sz().0 * total_blk_cnt),
            total_data_sz,
            internal_frag_sz: Bytes(reserved - total_data_sz.0),
            desc_blk_cnt: desc_stream_blk_cnt(cfg, objs),
        }
    }

    /// Share of the space lost to holes.
    pub fn external_frag_ratio(&self) -> f64 {
        if self.total_blk_cnt == 0 {
            0.0
        } else {
            self.free_blk_cnt as f64 / self.total_blk_cnt as f64
        }
    }

    /// Share of the reserved bytes wasted in partially-used tail blocks.
    pub fn internal_frag_ratio(&self) -> f64 {
        if self.total_data_sz.0 == 0 {
            0.0
        } else {
            self.internal_frag_sz.0 as f64 / self.total_data_sz.0 as f64
        }
    }
}

impl fmt::Display for SpaceStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Block cnt: {}", self.total_blk_cnt)?;
        writeln!(f, "File size: {} kb", kb(self.total_file_sz))?;
        writeln!(f, "Useful data size: {} kb", kb(self.total_data_sz))?;
        writeln!(f, "Descriptor stream block cnt: {}", self.desc_blk_cnt)?;
        writeln!(f)?;
        writeln!(f, "Free block cnt: {}", self.free_blk_cnt)?;
        writeln!(f, "Free block (at the end) cnt: {}", self.free_blk_at_end_cnt)?;
        writeln!(
            f,
            "Free size: {} kb",
            kb(Bytes(self.total_file_sz.0 / self.total_blk_cnt.max(1) * self.free_blk_cnt))
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "External frag: {:.2} % of blocks are freed/unused",
            self.external_frag_ratio() * 100.0
        )?;
        writeln!(
            f,
            "Internal frag: {:.2} % of data is reserved but wasted (doesn't contain useful data)",
            self.internal_frag_ratio() * 100.0
        )?;
        writeln!(f)?;
        writeln!(f, "Minimum theoretical total blk cnt: {}", self.non_free_blk_cnt)?;
        writeln!(
            f,
            "Minimum theoretical file size: {} kb",
            kb(Bytes(self.total_file_sz.0 / self.total_blk_cnt.max(1) * self.non_free_blk_cnt))
        )
    }
}

/// Blocks needed to hold every live object's descriptor when descriptors
/// are packed back to back into shared stream blocks, each new descriptor
/// going into the last block if it still has room.
pub fn desc_stream_blk_cnt(cfg: &BlockCfg, objs: &ObjectPool) -> usize {
    let blk_sz = cfg.blk_sz().0;
    let mut last_free = 0;
    let mut blk_cnt = 0;

    for obj in objs.iter().filter(|obj| obj.is_live()) {
        let desc_sz = obj.kind.desc_base_sz().0;
        assert!(desc_sz <= blk_sz, "descriptor larger than a block");
        if last_free >= desc_sz {
            last_free -= desc_sz;
        } else {
            last_free = blk_sz - desc_sz;
            blk_cnt += 1;
        }
    }

    blk_cnt
}

/// Lengths of the free runs scattered through the space, in blocks.
pub fn free_runs(space: &[ObjId]) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut current = 0;
    for &blk in space {
        if blk == 0 {
            current += 1;
        } else if current > 0 {
            runs.push(current);
            current = 0;
        }
    }
    if current > 0 {
        runs.push(current);
    }
    runs
}

/// Per-block object ids, `....` for free blocks, 30 blocks per line.
pub fn render_obj_id_map(space: &[ObjId]) -> String {
    render_map(space, 30, |blk| match blk {
        0 => ".... ".to_string(),
        id => format!("{:04x} ", id),
    })
}

/// Per-block object types as doubled letters, 60 blocks per line.
pub fn render_obj_type_map(space: &[ObjId], objs: &ObjectPool) -> String {
    render_map(space, 60, |blk| match blk {
        0 => ".. ".to_string(),
        id => {
            let code = objs
                .get(id)
                .expect("space references an unknown object")
                .kind
                .code()
                .to_ascii_uppercase();
            format!("{}{} ", code, code)
        }
    })
}

/// Per-block page numbers, 30 blocks per line.
pub fn render_page_map(space: &[ObjId], objs: &ObjectPool) -> String {
    render_map(space, 30, |blk| match blk {
        0 => ".... ".to_string(),
        id => format!(
            "{:04x} ",
            objs.get(id).expect("space references an unknown object").page_no
        ),
    })
}

fn render_map<F>(space: &[ObjId], width: usize, mut cell: F) -> String
where
    F: FnMut(ObjId) -> String,
{
    let mut out = String::new();
    for (i, &blk) in space.iter().enumerate() {
        out.push_str(&cell(blk));
        if (i + 1) % width == 0 {
            out.push('\n');
        }
    }
    if !space.is_empty() && space.len() % width != 0 {
        out.push('\n');
    }
    out
}
