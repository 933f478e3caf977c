/*!

## About

`extent_alloc` simulates how a single-file storage container assigns
fixed-size blocks to user-visible objects, deletes them, reassigns their
blocks and shrinks the backing space when trailing blocks come free. Its
purpose is to compare allocation strategies against trace-like editing
workloads derived from real documents, and to produce reproducible
fragmentation statistics and visual fragmentation maps.

Four strategies are implemented:

- **monotonic**: append-only, never reuses a block. The baseline, and the
  fastest allocator possible.
- **kr**: classic first-fit over an ordered free list, with optional
  coalescing of adjacent holes and a minimum-remainder split policy.
- **halving-kr**: a decorator over `kr` that splits large requests into
  power-of-two-shrinking chunks the backend can place in existing holes,
  expanding the space only as a last resort.
- **linear-kr**: a decorator over `kr` that probes hole sizes linearly,
  steered by the backend's closest-hole hints, under a hard cap on how many
  extents one object may scatter into.

The driver is deterministic end to end: a seeded workload synthesizer turns
an ordered object feed into the action stream of a simulated *copier*,
*note taker* or *editor*, and the simulator replays that stream while
checking a rich set of invariants against its own ground-truth block array.
The same seed, feed and parameters always reproduce the same space, the
same statistics and the same trace, which is what makes the strategy
comparisons meaningful.

```text
+-----------------------------------------------------------------------+
| Object feed (one record per drawn object: kind, sizes, page)          |
+-----------------------------------------------------------------------+
                  |
                  | sized objects
                  v
+-----------------------------------------------------------------------+
| Workload synthesizer (copier / notetaker / editor, seeded)            |
+-----------------------------------------------------------------------+
                  |
                  | insert / delete actions
                  v
+-----------------------------------------------------------------------+
| Simulator: ground-truth block array, invariant checks, trace stream   |
+-----------------------------------------------------------------------+
                  |                                     ^
                  | AllocRequest / DeallocRequest       | Response
                  v                                     |
+-----------------------------------------------------------------------+
| SpaceAllocator: Mono | Kr | HalvingKr | LinearKr                      |
+-----------------------------------------------------------------------+
                  |
                  | final space + objects + allocator state
                  v
+-----------------------------------------------------------------------+
| Stats & maps: fragmentation ratios, hole runs, per-block renderings   |
+-----------------------------------------------------------------------+
```

Everything is single-threaded and cooperative: the simulator owns the
block array, each allocator owns its free-space bookkeeping, and they only
exchange request/response values. `not_enough_space` is an ordinary answer
(meaningful only when a decorator forbids expansion), while any
disagreement between the allocator and the simulator's ground truth aborts
the run: those are bugs, never conditions to recover from.

 */

mod allocator;
mod extent;
mod halving;
mod kr;
mod linear;
mod monotonic;
mod object;
mod response;
mod simulator;
pub mod stats;
mod units;
mod workload;

pub use crate::allocator::{AllocOpts, Allocator, SpaceAllocator, Strategy};
pub use crate::extent::{Extent, Segment};
pub use crate::halving::HalvingAllocator;
pub use crate::kr::KrAllocator;
pub use crate::linear::LinearAllocator;
pub use crate::monotonic::MonotonicAllocator;
pub use crate::object::{ObjId, ObjKind, ObjRecord, Object, ObjectPool};
pub use crate::response::{AllocRequest, DeallocRequest, HintPolicy, Response};
pub use crate::simulator::{FinalState, SharedTrace, Simulator};
pub use crate::stats::SpaceStats;
pub use crate::units::{kb, BlockCfg, Blocks, Bytes};
pub use crate::workload::{synthesize, Action, Workload, WorkloadParams, WriterModel};

use thiserror::Error;

/// Configuration mistakes surfaced to the caller; everything else that can
/// go wrong in here is an invariant violation and aborts the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown allocator `{0}` (expected one of: mono, kr, halving-kr, linear-kr)")]
    UnknownAllocator(String),
    #[error("unknown writer model `{0}` (expected one of: copier, notetaker, editor)")]
    UnknownWriterModel(String),
}
