//! Out-of-core multi-device blocked Cholesky.
//!
//! The orchestrator walks the block columns of the lower triangle with
//! the right-looking schedule: factor the diagonal tile, solve the
//! panel below it, apply the rank-k update to the trailing submatrix,
//! then move on. Tiles live on the device owning their block row; data
//! crossing devices goes through the host matrix, with stream events
//! providing the only happens-before edges.
//!
//! Host memory is the source of truth between iterations: the diagonal
//! and panel tiles of column `k` are written back eagerly, so any
//! device can re-stage them, and evicting a tile always writes it back
//! first when dirty.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{CompletionEvent, DeviceArena, DeviceBuffer, DeviceStream};
use crate::error::{CholForgeError, CholResult};
use crate::matrix::MatrixMut;
use crate::ops::blas::{gemm_nt, potrf_lower, syrk_lower, trsm_right_lower_trans};
use crate::options::CholeskyOptions;
use crate::plan::{BlockAlloc, BlockPlan};
use crate::registry::{DeviceId, DeviceRegistry};
use crate::scalar::Scalar;
use crate::transfer;

/// Block-row/block-column coordinates of a tile in the lower triangle.
type TileKey = (usize, usize);

/// Raw view of the caller's matrix shared with stream workers.
///
/// Workers touch disjoint tiles, and every access is ordered either by
/// stream FIFO or by a recorded event, so no two commands race on the
/// same tile.
#[derive(Clone, Copy)]
struct HostMat<T> {
    ptr: *mut T,
    lda: usize,
}

unsafe impl<T> Send for HostMat<T> {}
unsafe impl<T> Sync for HostMat<T> {}

impl<T> HostMat<T> {
    /// Pointer to element `(row, col)` of the host matrix.
    ///
    /// # Safety
    ///
    /// `(row, col)` must lie inside the matrix the pointer was taken
    /// from, and that borrow must still be live.
    unsafe fn tile_ptr(&self, row: usize, col: usize) -> *mut T {
        self.ptr.add(col * self.lda + row)
    }
}

struct ResidentTile<T: Scalar> {
    buf: Arc<DeviceBuffer<T>>,
    bytes: usize,
    dirty: bool,
    touch: u64,
}

/// Per-device execution state: one stream, one budget, one tile cache.
struct DeviceCtx<T: Scalar> {
    id: DeviceId,
    stream: DeviceStream,
    arena: Arc<DeviceArena>,
    tiles: Mutex<HashMap<TileKey, ResidentTile<T>>>,
    clock: AtomicU64,
}

impl<T: Scalar> DeviceCtx<T> {
    fn new(id: DeviceId, budget: usize) -> Self {
        DeviceCtx {
            id,
            stream: DeviceStream::new(id),
            arena: Arc::new(DeviceArena::new(id, budget)),
            tiles: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Return the resident buffer for `key`, staging it from the host
    /// when absent. `wait` orders the upload after an event recorded on
    /// another stream; tiles named in `pinned` are exempt from eviction
    /// while making room.
    fn ensure_resident(
        &self,
        host: HostMat<T>,
        plan: &BlockPlan,
        key: TileKey,
        wait: Option<&CompletionEvent>,
        pinned: &[TileKey],
    ) -> CholResult<Arc<DeviceBuffer<T>>> {
        if let Some(tile) = self.tiles.lock()?.get_mut(&key) {
            tile.touch = self.tick();
            return Ok(Arc::clone(&tile.buf));
        }
        let rows = plan.block(key.0).size;
        let cols = plan.block(key.1).size;
        let bytes = rows * cols * T::elem_size();
        self.make_room(host, plan, bytes, pinned)?;
        self.admit(host, plan, key, wait)
    }

    /// Stage `key` if it is absent and fits without evicting anything.
    fn try_prefetch(&self, host: HostMat<T>, plan: &BlockPlan, key: TileKey) -> CholResult<()> {
        if self.tiles.lock()?.contains_key(&key) {
            return Ok(());
        }
        let rows = plan.block(key.0).size;
        let cols = plan.block(key.1).size;
        let bytes = rows * cols * T::elem_size();
        if !self.arena.would_fit(bytes) {
            tracing::trace!(device = %self.id, tile = ?key, "skipping prefetch, no headroom");
            return Ok(());
        }
        self.admit(host, plan, key, None).map(|_| ())
    }

    /// Reserve budget, enqueue the host-to-device copy, and index the
    /// tile. Capacity must already be available.
    fn admit(
        &self,
        host: HostMat<T>,
        plan: &BlockPlan,
        key: TileKey,
        wait: Option<&CompletionEvent>,
    ) -> CholResult<Arc<DeviceBuffer<T>>> {
        let rows = plan.block(key.0).size;
        let cols = plan.block(key.1).size;
        let bytes = rows * cols * T::elem_size();
        self.arena.reserve(bytes)?;
        let buf = Arc::new(DeviceBuffer::host(rows * cols));
        if let Some(ev) = wait {
            self.stream.wait_event(ev);
        }
        let src = unsafe { host.tile_ptr(plan.block(key.0).start, plan.block(key.1).start) };
        unsafe {
            transfer::copy_2d_to_device_async(
                rows,
                cols,
                src,
                host.lda,
                Arc::clone(&buf),
                rows,
                &self.stream,
            )?;
        }
        tracing::trace!(device = %self.id, tile = ?key, bytes, "staging tile");
        self.tiles.lock()?.insert(
            key,
            ResidentTile {
                buf: Arc::clone(&buf),
                bytes,
                dirty: false,
                touch: self.tick(),
            },
        );
        Ok(buf)
    }

    fn mark_dirty(&self, key: TileKey) -> CholResult<()> {
        if let Some(tile) = self.tiles.lock()?.get_mut(&key) {
            tile.dirty = true;
        }
        Ok(())
    }

    /// Enqueue a device-to-host copy of `key` if it holds unwritten
    /// results, and mark it clean.
    fn write_back(&self, host: HostMat<T>, plan: &BlockPlan, key: TileKey) -> CholResult<()> {
        let mut tiles = self.tiles.lock()?;
        let Some(tile) = tiles.get_mut(&key) else {
            return Ok(());
        };
        if !tile.dirty {
            return Ok(());
        }
        tile.dirty = false;
        let rows = plan.block(key.0).size;
        let cols = plan.block(key.1).size;
        let dst = unsafe { host.tile_ptr(plan.block(key.0).start, plan.block(key.1).start) };
        unsafe {
            transfer::copy_2d_to_host_async(
                rows,
                cols,
                Arc::clone(&tile.buf),
                rows,
                dst,
                host.lda,
                &self.stream,
            )?;
        }
        Ok(())
    }

    /// Evict least-recently-used tiles until `bytes` fit. Eviction
    /// writes dirty tiles back first and releases the budget on the
    /// stream, after every command still using the buffer.
    fn make_room(
        &self,
        host: HostMat<T>,
        plan: &BlockPlan,
        bytes: usize,
        pinned: &[TileKey],
    ) -> CholResult<()> {
        loop {
            if self.arena.would_fit(bytes) {
                return Ok(());
            }
            if !self.evict_lru(host, plan, pinned)? {
                return Err(CholForgeError::OutOfMemory {
                    device_id: self.id.0,
                    requested: bytes,
                    available: self.arena.available(),
                });
            }
            // Drain the stream so the deferred release lands before the
            // headroom re-check.
            self.stream.synchronize();
        }
    }

    fn evict_lru(
        &self,
        host: HostMat<T>,
        plan: &BlockPlan,
        pinned: &[TileKey],
    ) -> CholResult<bool> {
        let victim = {
            let tiles = self.tiles.lock()?;
            tiles
                .iter()
                .filter(|(key, _)| !pinned.contains(key))
                .min_by_key(|(_, tile)| tile.touch)
                .map(|(key, _)| *key)
        };
        let Some(key) = victim else {
            return Ok(false);
        };
        self.write_back(host, plan, key)?;
        let Some(tile) = self.tiles.lock()?.remove(&key) else {
            return Ok(false);
        };
        tracing::debug!(device = %self.id, tile = ?key, bytes = tile.bytes, "evicting tile");
        self.deferred_release(tile.bytes);
        Ok(true)
    }

    /// Drop every tile in block column `col`. Callers guarantee the
    /// column has been written back.
    fn drop_column(&self, col: usize) -> CholResult<()> {
        let mut tiles = self.tiles.lock()?;
        let keys: Vec<TileKey> = tiles.keys().filter(|key| key.1 == col).copied().collect();
        for key in keys {
            if let Some(tile) = tiles.remove(&key) {
                self.deferred_release(tile.bytes);
            }
        }
        Ok(())
    }

    /// Release budget on the stream so accounting trails the commands
    /// still holding the buffer.
    fn deferred_release(&self, bytes: usize) {
        let arena = Arc::clone(&self.arena);
        self.stream.submit("arena-release", move || {
            arena.release(bytes);
            Ok(())
        });
    }
}

fn ctx_for<'a, T: Scalar>(
    ctxs: &'a HashMap<DeviceId, DeviceCtx<T>>,
    id: DeviceId,
) -> CholResult<&'a DeviceCtx<T>> {
    ctxs.get(&id).ok_or_else(|| {
        CholForgeError::InvalidArgument(format!("no execution context for device {id}"))
    })
}

/// First fault across all streams, preferring the numeric failure so a
/// non-positive-definite input is not masked by downstream noise.
fn collect_fault<T: Scalar>(ctxs: &HashMap<DeviceId, DeviceCtx<T>>) -> Option<CholForgeError> {
    let mut first = None;
    for ctx in ctxs.values() {
        if let Some(err) = ctx.stream.fault() {
            if matches!(err, CholForgeError::NotPositiveDefinite { .. }) {
                return Some(err);
            }
            if first.is_none() {
                first = Some(err);
            }
        }
    }
    first
}

fn drain_all<T: Scalar>(ctxs: &HashMap<DeviceId, DeviceCtx<T>>) -> CholResult<()> {
    for ctx in ctxs.values() {
        ctx.stream.synchronize();
    }
    match collect_fault(ctxs) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Run the out-of-core factorization over an explicit block plan.
///
/// On success the lower triangle of `matrix` holds the Cholesky factor
/// in place; the strictly upper triangle is never read or written. A
/// `NotPositiveDefinite` error names the block column whose diagonal
/// factorization failed.
pub fn par_potrf<T: Scalar>(
    matrix: &mut MatrixMut<'_, T>,
    registry: &DeviceRegistry,
    plan: &BlockPlan,
    options: &CholeskyOptions,
) -> CholResult<()> {
    if plan.n() != matrix.n() {
        return Err(CholForgeError::InvalidArgument(format!(
            "plan covers a {}x{} matrix but the input is {}x{}",
            plan.n(),
            plan.n(),
            matrix.n(),
            matrix.n()
        )));
    }
    registry.validate_plan(plan)?;

    let host = HostMat {
        ptr: matrix.as_mut_ptr(),
        lda: matrix.lda(),
    };

    let mut ctxs: HashMap<DeviceId, DeviceCtx<T>> = HashMap::new();
    for block in plan.blocks() {
        if !ctxs.contains_key(&block.device_id) {
            let info = registry.resolve(block.device_id)?;
            let budget = options.usable_budget(info.free_memory);
            ctxs.insert(block.device_id, DeviceCtx::new(block.device_id, budget));
        }
    }

    // The tightest step needs three distinct tiles resident at once.
    let largest = plan.max_block_size();
    let tiles_needed = plan.num_blocks().min(3);
    let min_bytes = tiles_needed * largest * largest * T::elem_size();
    for ctx in ctxs.values() {
        if ctx.arena.capacity() < min_bytes {
            return Err(CholForgeError::OutOfMemory {
                device_id: ctx.id.0,
                requested: min_bytes,
                available: ctx.arena.capacity(),
            });
        }
    }

    let num_blocks = plan.num_blocks();
    tracing::debug!(
        n = plan.n(),
        num_blocks,
        devices = ctxs.len(),
        "starting out-of-core factorization"
    );

    for k in 0..num_blocks {
        let owner = plan.owner(k);
        let bs = plan.block(k).size;
        tracing::debug!(k, %owner, bs, "factoring block column");

        // Diagonal factorization on the owner of block row k.
        let octx = ctx_for(&ctxs, owner)?;
        let diag = octx.ensure_resident(host, plan, (k, k), None, &[(k, k)])?;
        {
            let diag = Arc::clone(&diag);
            octx.stream.submit("potrf", move || {
                let res = diag.with_mut(|data| potrf_lower(bs, data, bs))?;
                res.map_err(|err| match err {
                    CholForgeError::NotPositiveDefinite { .. } => {
                        CholForgeError::NotPositiveDefinite { block: k }
                    }
                    other => other,
                })
            });
        }
        octx.mark_dirty((k, k))?;
        octx.write_back(host, plan, (k, k))?;
        let diag_ready = octx.stream.record();

        // Panel solves, one per block row below the diagonal.
        let mut panel_ready: HashMap<usize, CompletionEvent> = HashMap::new();
        for i in (k + 1)..num_blocks {
            let row_owner = plan.owner(i);
            let dctx = ctx_for(&ctxs, row_owner)?;
            let rows = plan.block(i).size;
            let pinned = [(k, k), (i, k)];
            let lkk = if row_owner == owner {
                octx.ensure_resident(host, plan, (k, k), None, &pinned)?
            } else {
                dctx.ensure_resident(host, plan, (k, k), Some(&diag_ready), &pinned)?
            };
            let bik = dctx.ensure_resident(host, plan, (i, k), None, &pinned)?;
            {
                let lkk = Arc::clone(&lkk);
                let bik = Arc::clone(&bik);
                dctx.stream.submit("trsm", move || {
                    let res = lkk.with(|l| {
                        bik.with_mut(|b| trsm_right_lower_trans(rows, bs, T::ONE, l, bs, b, rows))
                    })?;
                    res?
                });
            }
            dctx.mark_dirty((i, k))?;
            dctx.write_back(host, plan, (i, k))?;
            panel_ready.insert(i, dctx.stream.record());
        }

        // Trailing update of every tile right of column k.
        for j in (k + 1)..num_blocks {
            for i in j..num_blocks {
                let row_owner = plan.owner(i);
                let dctx = ctx_for(&ctxs, row_owner)?;
                let rows = plan.block(i).size;
                let cols = plan.block(j).size;
                let pinned = [(i, k), (j, k), (i, j)];

                let target = dctx.ensure_resident(host, plan, (i, j), None, &pinned)?;
                if i == j {
                    let ajk = dctx.ensure_resident(host, plan, (j, k), None, &pinned)?;
                    let target = Arc::clone(&target);
                    dctx.stream.submit("syrk", move || {
                        let res = target.with_mut(|c| {
                            ajk.with(|a| {
                                syrk_lower(cols, bs, -T::ONE, a, cols, T::ONE, c, cols)
                            })
                        })?;
                        res?
                    });
                } else {
                    let aik = dctx.ensure_resident(host, plan, (i, k), None, &pinned)?;
                    let wait = if plan.owner(j) == row_owner {
                        None
                    } else {
                        panel_ready.get(&j)
                    };
                    let ajk = dctx.ensure_resident(host, plan, (j, k), wait, &pinned)?;
                    let target = Arc::clone(&target);
                    dctx.stream.submit("gemm", move || {
                        let res = target.with_mut(|c| {
                            aik.with(|a| {
                                ajk.with(|b| {
                                    gemm_nt(
                                        rows, cols, bs, -T::ONE, a, rows, b, cols, T::ONE, c,
                                        rows,
                                    )
                                })
                            })
                        })?;
                        let res = res?;
                        res?
                    });
                }
                dctx.mark_dirty((i, j))?;
            }
        }

        // Column k is final; free its tiles and staged copies everywhere.
        for ctx in ctxs.values() {
            ctx.drop_column(k)?;
        }

        // Best-effort restaging of upcoming columns into spare headroom.
        for col in (k + 1)..(k + 1 + options.lookahead).min(num_blocks) {
            for i in col..num_blocks {
                let ctx = ctx_for(&ctxs, plan.owner(i))?;
                ctx.try_prefetch(host, plan, (i, col))?;
            }
        }

        if let Some(err) = collect_fault(&ctxs) {
            tracing::warn!(k, error = %err, "aborting factorization");
            let _ = drain_all(&ctxs);
            return Err(err);
        }
    }

    drain_all(&ctxs)
}

/// Factor the lower triangle of `matrix` in place, choosing between the
/// in-core and out-of-core paths.
///
/// When the whole matrix fits in one device's budget the factorization
/// runs directly on the caller's buffer; otherwise a block plan is
/// derived from the per-device budgets and executed by [`par_potrf`].
/// Returns the plan that was used.
pub fn factor_in_place<T: Scalar>(
    matrix: &mut MatrixMut<'_, T>,
    registry: &DeviceRegistry,
    options: &CholeskyOptions,
) -> CholResult<BlockPlan> {
    let n = matrix.n();
    let elem = T::elem_size();

    let roomiest = registry
        .devices()
        .iter()
        .max_by_key(|d| d.free_memory)
        .ok_or_else(|| CholForgeError::InvalidArgument("device registry is empty".into()))?;
    let best_budget = options.usable_budget(roomiest.free_memory);

    if !options.force_out_of_core && best_budget / elem >= n * n {
        tracing::debug!(n, device = %roomiest.device_id, "matrix fits in core");
        let lda = matrix.lda();
        let res = potrf_lower(n, matrix.as_mut_slice(), lda);
        res.map_err(|err| match err {
            CholForgeError::NotPositiveDefinite { .. } => {
                CholForgeError::NotPositiveDefinite { block: 0 }
            }
            other => other,
        })?;
        return BlockPlan::new(
            vec![BlockAlloc {
                start: 0,
                end: n,
                size: n,
                device_id: roomiest.device_id,
                alloc_id: 0,
            }],
            n,
        );
    }

    let tightest = registry
        .devices()
        .iter()
        .min_by_key(|d| options.usable_budget(d.free_memory))
        .ok_or_else(|| CholForgeError::InvalidArgument("device registry is empty".into()))?;
    let min_budget = options.usable_budget(tightest.free_memory);
    // Even a unit block needs 2n + 1 elements resident; below that the
    // budget cannot host any plan.
    let bs = crate::plan::max_block_size(n, min_budget / elem).map_err(|_| {
        CholForgeError::OutOfMemory {
            device_id: tightest.device_id.0,
            requested: (2 * n + 1) * elem,
            available: min_budget,
        }
    })?;
    let template = BlockPlan::round_robin(n, registry.len(), options.block_multiplier, bs)?;
    // round_robin numbers devices 0..len; map them onto registry ids.
    let blocks = template
        .blocks()
        .iter()
        .map(|b| BlockAlloc {
            start: b.start,
            end: b.end,
            size: b.size,
            device_id: registry.devices()[b.alloc_id % registry.len()].device_id,
            alloc_id: b.alloc_id,
        })
        .collect();
    let plan = BlockPlan::new(blocks, n)?;
    par_potrf(matrix, registry, &plan, options)?;
    Ok(plan)
}
