//! Byte-pool dynamic allocator.
//!
//! Every block starts with a two-word header: the next block in an
//! address-ordered circular ring, and an owner word holding the pool
//! pointer (allocated) or a FREE marker. Block size is implicit from
//! the address gap between consecutive headers; a permanently-allocated
//! sentinel closes the ring. Allocation is first-fit from a roving
//! search pointer with lazy coalescing of adjacent free blocks; free is
//! O(1). Pools are walked under scheduler-suspend so ticks and device
//! interrupts are never delayed.

use core::ptr::NonNull;

use crate::error::{KernelError, KernelResult};
use crate::sched;

const BYTE_ALIGN: usize = 8;
const BYTE_ALIGN_MASK: usize = BYTE_ALIGN - 1;

/// Block header: two words at the start of every block.
#[repr(C)]
struct BlockHeader {
    /// Next block in address order (ring)
    next: *mut u8,
    /// Owning pool when allocated, [`BLOCK_FREE`] when free
    owner: *mut u8,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

/// Minimum total block size (header + payload); a smaller remainder is
/// not split off.
const BLOCK_MIN: usize = HEADER_SIZE + BYTE_ALIGN;

/// Owner marker for free blocks.
const BLOCK_FREE: *mut u8 = 0xA5A5_A5A5usize as *mut u8;

/// Magic stored in a live pool descriptor.
const POOL_MAGIC: u32 = 0xDEAD_BEEF;

#[inline]
unsafe fn header<'a>(block: *mut u8) -> &'a mut BlockHeader {
    unsafe { &mut *(block as *mut BlockHeader) }
}

/// Byte pool descriptor. Each pool manages its own contiguous region;
/// multiple pools coexist independently.
///
/// A pool must not move after [`BytePool::create`]: allocated block
/// headers store its address.
pub struct BytePool {
    pool_start: *mut u8,
    pool_size: usize,
    available: usize,
    fragments: u32,
    search_ptr: *mut u8,
    block_list: *mut u8,
    pool_id: u32,
}

unsafe impl Send for BytePool {}

impl BytePool {
    /// Create an inert descriptor. [`BytePool::create`] installs the
    /// region.
    pub const fn new() -> Self {
        BytePool {
            pool_start: core::ptr::null_mut(),
            pool_size: 0,
            available: 0,
            fragments: 0,
            search_ptr: core::ptr::null_mut(),
            block_list: core::ptr::null_mut(),
            pool_id: 0,
        }
    }

    /// Install a raw memory region: one initial free block spanning the
    /// pool and a permanently-allocated end sentinel closing the ring.
    ///
    /// # Errors
    /// `Invalid` for a null region or one too small for two blocks.
    ///
    /// # Safety
    /// The region must stay exclusively owned by the pool for the
    /// pool's lifetime, and the descriptor must not move afterwards.
    pub unsafe fn create(&mut self, pool_start: *mut u8, pool_size: usize) -> KernelResult<()> {
        if pool_start.is_null() || pool_size < BLOCK_MIN * 2 {
            return Err(KernelError::Invalid);
        }

        // Align the start upward, shrink and round the size down.
        let aligned_start =
            ((pool_start as usize + BYTE_ALIGN_MASK) & !BYTE_ALIGN_MASK) as *mut u8;
        let mut usable = pool_size - (aligned_start as usize - pool_start as usize);
        usable &= !BYTE_ALIGN_MASK;

        self.pool_start = aligned_start;
        self.pool_size = usable;

        unsafe {
            let end_block = aligned_start.add(usable - HEADER_SIZE);

            // One free block covering everything up to the sentinel.
            *header(aligned_start) = BlockHeader {
                next: end_block,
                owner: BLOCK_FREE,
            };
            // Sentinel: owned by the pool, wraps back to the start.
            *header(end_block) = BlockHeader {
                next: aligned_start,
                owner: self as *mut BytePool as *mut u8,
            };
        }

        self.block_list = aligned_start;
        self.search_ptr = aligned_start;
        self.available = usable - 2 * HEADER_SIZE;
        self.fragments = 1;
        self.pool_id = POOL_MAGIC;

        Ok(())
    }

    /// Allocate `size` payload bytes. Returns `None` for a zero size,
    /// a dead pool, or when no block fits.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if self.pool_id != POOL_MAGIC || size == 0 {
            return None;
        }

        // Round up to the alignment boundary.
        let size = (size + BYTE_ALIGN_MASK) & !BYTE_ALIGN_MASK;

        sched::t_sched_suspend();
        let ptr = if size <= self.available {
            unsafe { self.search(size) }
        } else {
            None
        };
        sched::t_sched_resume();

        ptr
    }

    /// First-fit search from the roving pointer with lazy coalescing.
    unsafe fn search(&mut self, size: usize) -> Option<NonNull<u8>> {
        let mut current = self.search_ptr;
        // Walking fragments + 1 blocks guarantees a full wrap-around.
        let mut examine = self.fragments + 1;

        unsafe {
            while examine > 0 {
                examine -= 1;

                if header(current).owner == BLOCK_FREE {
                    // Absorb every consecutive free neighbor; blocks are
                    // in address order so a merge is one pointer update.
                    let mut next = header(current).next;
                    while header(next).owner == BLOCK_FREE {
                        header(current).next = header(next).next;
                        self.fragments -= 1;
                        next = header(current).next;
                    }

                    let available_bytes = next as usize - current as usize - HEADER_SIZE;
                    if available_bytes >= size {
                        // Split off the remainder when it is worth a block.
                        if available_bytes - size >= BLOCK_MIN {
                            let split = current.add(HEADER_SIZE + size);
                            *header(split) = BlockHeader {
                                next: header(current).next,
                                owner: BLOCK_FREE,
                            };
                            header(current).next = split;
                            self.fragments += 1;
                        }

                        header(current).owner = self as *mut BytePool as *mut u8;

                        // Accounting is modular: headers between adjacent
                        // free blocks count as available until a merge
                        // reclaims them, so the books balance on free.
                        let next = header(current).next;
                        self.available = self
                            .available
                            .wrapping_sub(next as usize - current as usize);
                        self.fragments -= 1;

                        // The next search resumes past this allocation.
                        self.search_ptr = next;

                        return NonNull::new(current.add(HEADER_SIZE));
                    }
                }

                current = header(current).next;
            }
        }

        None
    }

    /// Payload bytes currently free. Fragmentation may keep the largest
    /// single allocation smaller than this.
    pub fn available(&self) -> usize {
        if self.pool_id != POOL_MAGIC {
            return 0;
        }
        self.available
    }

    /// Number of free fragments in the ring.
    pub fn fragments(&self) -> u32 {
        self.fragments
    }

    /// Invalidate the pool. It must be re-created before further use.
    pub fn delete(&mut self) {
        sched::t_sched_suspend();
        self.pool_id = 0;
        sched::t_sched_resume();
    }
}

impl Default for BytePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Release memory back to its owning byte pool.
///
/// The pool is identified from the block header just before `ptr`;
/// freeing below the roving pointer rolls the pointer back so the
/// region is rediscovered quickly.
///
/// # Errors
/// `Null` for a null pointer, `Invalid` when the owner word does not
/// name a live pool (this detects double-frees).
///
/// # Safety
/// `ptr` must have been returned by [`BytePool::alloc`] (or
/// [`t_malloc`]) and not freed since.
pub unsafe fn t_pool_free(ptr: *mut u8) -> KernelResult<()> {
    if ptr.is_null() {
        return Err(KernelError::Null);
    }

    unsafe {
        // Step back over the header to the block start.
        let block = ptr.sub(HEADER_SIZE);

        let owner = header(block).owner;
        if owner.is_null() || owner == BLOCK_FREE {
            return Err(KernelError::Invalid);
        }
        let pool = &mut *(owner as *mut BytePool);
        if pool.pool_id != POOL_MAGIC {
            return Err(KernelError::Invalid);
        }

        sched::t_sched_suspend();

        // Block size is the gap to the next header.
        let block_size = header(block).next as usize - block as usize;
        pool.available = pool.available.wrapping_add(block_size);
        pool.fragments += 1;
        header(block).owner = BLOCK_FREE;

        // Pull the roving pointer back so the next allocation finds the
        // just-freed region.
        if block < pool.search_ptr {
            pool.search_ptr = block;
        }

        sched::t_sched_resume();
    }

    Ok(())
}

// ============ Default Pool ============

#[cfg(feature = "dynamic-alloc")]
mod default_pool {
    use core::sync::atomic::{AtomicBool, Ordering};

    use super::BytePool;
    use crate::config::DYNAMIC_MEM_SIZE;
    use crate::cs_cell::CsCell;

    #[repr(align(8))]
    struct PoolBacking([u8; DYNAMIC_MEM_SIZE]);

    static mut DEFAULT_MEM: PoolBacking = PoolBacking([0; DYNAMIC_MEM_SIZE]);

    pub(super) static DEFAULT_POOL: CsCell<BytePool> = CsCell::new(BytePool::new());

    static DEFAULT_POOL_INITED: AtomicBool = AtomicBool::new(false);

    /// Create the default pool on first use.
    pub(super) fn ensure_default_pool() {
        if !DEFAULT_POOL_INITED.swap(true, Ordering::AcqRel) {
            unsafe {
                let pool = DEFAULT_POOL.get_unchecked();
                let mem = &raw mut DEFAULT_MEM;
                let _ = pool.create((*mem).0.as_mut_ptr(), DYNAMIC_MEM_SIZE);
            }
        }
    }
}

/// Allocate from the default byte pool.
#[cfg(feature = "dynamic-alloc")]
pub fn t_malloc(size: usize) -> Option<NonNull<u8>> {
    default_pool::ensure_default_pool();
    unsafe { default_pool::DEFAULT_POOL.get_unchecked().alloc(size) }
}

/// Free memory back to its owning pool.
///
/// # Safety
/// See [`t_pool_free`].
#[cfg(feature = "dynamic-alloc")]
pub unsafe fn t_free(ptr: *mut u8) -> KernelResult<()> {
    unsafe { t_pool_free(ptr) }
}

/// Available bytes in the default pool.
#[cfg(feature = "dynamic-alloc")]
pub fn t_free_mem_size() -> usize {
    default_pool::ensure_default_pool();
    unsafe { default_pool::DEFAULT_POOL.get_unchecked().available() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Region([u8; 1024]);

    // Pools must not move once created, so build them in place.
    macro_rules! pool_fixture {
        ($region:ident, $pool:ident) => {
            let mut $region = Region([0; 1024]);
            let mut $pool = BytePool::new();
            unsafe {
                $pool
                    .create($region.0.as_mut_ptr(), $region.0.len())
                    .unwrap();
            }
        };
    }

    #[test]
    fn create_rejects_tiny_region() {
        let mut bytes = [0u8; 16];
        let mut pool = BytePool::new();
        assert_eq!(
            unsafe { pool.create(bytes.as_mut_ptr(), bytes.len()) },
            Err(KernelError::Invalid)
        );
    }

    #[test]
    fn create_installs_one_fragment() {
        pool_fixture!(region, pool);
        assert_eq!(pool.fragments(), 1);
        assert_eq!(pool.available(), 1024 - 2 * HEADER_SIZE);
    }

    #[test]
    fn alloc_rejects_zero_and_dead_pool() {
        pool_fixture!(region, pool);
        assert!(pool.alloc(0).is_none());

        pool.delete();
        assert!(pool.alloc(8).is_none());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn alloc_free_round_trip_restores_available() {
        pool_fixture!(region, pool);

        let before = pool.available();
        let p = pool.alloc(100).unwrap();
        assert!(pool.available() < before);

        unsafe { t_pool_free(p.as_ptr()).unwrap() };
        assert_eq!(pool.available(), before);
    }

    #[test]
    fn free_detects_double_free() {
        pool_fixture!(region, pool);

        let p = pool.alloc(64).unwrap();
        unsafe {
            t_pool_free(p.as_ptr()).unwrap();
            assert_eq!(t_pool_free(p.as_ptr()), Err(KernelError::Invalid));
        }
        assert_eq!(unsafe { t_pool_free(core::ptr::null_mut()) }, Err(KernelError::Null));
    }

    #[test]
    fn exhaustion_returns_none() {
        pool_fixture!(region, pool);
        assert!(pool.alloc(2048).is_none());
    }

    #[test]
    fn freed_middle_block_merges_during_allocation() {
        pool_fixture!(region, pool);

        let a = pool.alloc(200).unwrap();
        let b = pool.alloc(200).unwrap();
        let c = pool.alloc(200).unwrap();
        let _ = (a, c);

        // Freeing the middle block rolls the search pointer back to it.
        unsafe { t_pool_free(b.as_ptr()).unwrap() };
        let rolled_back = pool.search_ptr;
        assert_eq!(rolled_back, unsafe { b.as_ptr().sub(HEADER_SIZE) });

        // 256 aligned bytes do not fit the freed 200-byte hole, so the
        // first-fit walk continues past it into the tail region.
        let d = pool.alloc(250).unwrap();
        assert!(d.as_ptr() > c.as_ptr());

        // The roving pointer advanced past the new allocation.
        assert!(pool.search_ptr > d.as_ptr());
    }

    #[test]
    fn adjacent_free_blocks_coalesce() {
        pool_fixture!(region, pool);

        let a = pool.alloc(100).unwrap();
        let b = pool.alloc(100).unwrap();
        let _guard = pool.alloc(100).unwrap();

        unsafe {
            t_pool_free(a.as_ptr()).unwrap();
            t_pool_free(b.as_ptr()).unwrap();
        }
        // Two adjacent free fragments plus the tail remainder.
        assert_eq!(pool.fragments(), 3);

        // A request larger than either hole alone: lazy coalescing
        // merges the two neighbors during the search.
        let big = pool.alloc(200).unwrap();
        assert_eq!(big.as_ptr(), a.as_ptr());
        assert!(pool.fragments() >= 1);
    }

    #[test]
    fn split_only_when_remainder_is_useful() {
        pool_fixture!(region, pool);

        // Consume the whole pool in one block, then return it.
        let before = pool.available();
        let p = pool.alloc(before).unwrap();
        assert_eq!(pool.fragments(), 0);
        assert!(pool.alloc(8).is_none());
        unsafe { t_pool_free(p.as_ptr()).unwrap() };
        assert_eq!(pool.available(), before);
        assert_eq!(pool.fragments(), 1);
    }
}
