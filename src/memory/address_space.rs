/*!
 * Simulated Address Space
 * The process heap that parentless realms draw from
 *
 * Regions are zero-filled byte buffers keyed by their base address. Every
 * access must stay inside a single live region; anything else is reported as
 * an invalid argument instead of touching a neighbour.
 */

use crate::core::errors::{RealmError, RealmResult};
use crate::core::limits::{checked_align_to, ADDRESS_SPACE_BASE, REGION_ALIGN, REGION_GUARD};
use crate::core::types::{Address, Size};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

type Region = Arc<Mutex<Vec<u8>>>;

/// Address space statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressSpaceStats {
    pub live_regions: usize,
    pub live_bytes: Size,
    pub peak_bytes: Size,
    pub total_maps: u64,
    pub total_unmaps: u64,
    pub heap_limit: Option<Size>,
}

/// Simulated process heap
pub struct AddressSpace {
    regions: RwLock<BTreeMap<Address, Region>>,
    next_address: AtomicUsize,
    used_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    total_maps: AtomicUsize,
    total_unmaps: AtomicUsize,
    heap_limit: Option<Size>,
}

impl AddressSpace {
    pub fn new(heap_limit: Option<Size>) -> Self {
        Self {
            regions: RwLock::new(BTreeMap::new()),
            next_address: AtomicUsize::new(ADDRESS_SPACE_BASE),
            used_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            total_maps: AtomicUsize::new(0),
            total_unmaps: AtomicUsize::new(0),
            heap_limit,
        }
    }

    /// Map a fresh zero-filled region of `size` bytes
    pub fn map(&self, size: Size) -> RealmResult<Address> {
        if size == 0 {
            return Err(RealmError::invalid("cannot map an empty region"));
        }
        let exhausted = || RealmError::out_of_memory(size, "process heap");
        let span = checked_align_to(size, REGION_ALIGN)
            .and_then(|aligned| aligned.checked_add(REGION_GUARD))
            .ok_or_else(exhausted)?;

        // Reserve against the limit before touching the host allocator
        let limit = self.heap_limit.unwrap_or(Size::MAX);
        let used = self
            .used_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(size).filter(|&total| total <= limit)
            })
            .map_err(|used| {
                error!(requested = size, used, limit = ?self.heap_limit, "process heap exhausted");
                exhausted()
            })?;

        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(size).is_err() {
            self.used_bytes.fetch_sub(size, Ordering::SeqCst);
            error!(requested = size, "host refused region buffer");
            return Err(exhausted());
        }
        bytes.resize(size, 0);

        let address = match self
            .next_address
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(span))
        {
            Ok(address) => address,
            Err(next) => {
                self.used_bytes.fetch_sub(size, Ordering::SeqCst);
                error!(requested = size, next, "address range exhausted");
                return Err(exhausted());
            }
        };
        self.peak_bytes.fetch_max(used + size, Ordering::Relaxed);
        self.regions
            .write()
            .insert(address, Arc::new(Mutex::new(bytes)));
        self.total_maps.fetch_add(1, Ordering::Relaxed);

        trace!(address = format_args!("0x{:x}", address), size, "mapped region");
        Ok(address)
    }

    /// Return a region previously handed out by `map`
    pub fn unmap(&self, address: Address) -> RealmResult<Size> {
        let region = self.regions.write().remove(&address).ok_or_else(|| {
            RealmError::invalid(format!("0x{:x} is not the base of a live region", address))
        })?;
        let size = region.lock().len();
        self.used_bytes.fetch_sub(size, Ordering::SeqCst);
        self.total_unmaps.fetch_add(1, Ordering::Relaxed);

        trace!(address = format_args!("0x{:x}", address), size, "unmapped region");
        Ok(size)
    }

    /// Move a region to a new one of `size` bytes, preserving the common prefix
    pub fn remap(&self, address: Address, size: Size) -> RealmResult<Address> {
        let old = self.region_at(address)?;
        let new_address = self.map(size)?;
        // Never wait on the table lock while holding a region mutex
        let new = self.region_at(new_address)?;
        {
            let old = old.lock();
            let keep = old.len().min(size);
            new.lock()[..keep].copy_from_slice(&old[..keep]);
        }
        self.unmap(address)?;
        Ok(new_address)
    }

    /// Size of the region based at `address`
    pub fn region_size(&self, address: Address) -> RealmResult<Size> {
        Ok(self.region_at(address)?.lock().len())
    }

    /// Whether `address` is the base of a live region
    pub fn is_mapped(&self, address: Address) -> bool {
        self.regions.read().contains_key(&address)
    }

    pub fn write(&self, address: Address, data: &[u8]) -> RealmResult<()> {
        let (region, offset) = self.locate(address, data.len())?;
        region.lock()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, address: Address, len: Size) -> RealmResult<Vec<u8>> {
        let (region, offset) = self.locate(address, len)?;
        let bytes = region.lock()[offset..offset + len].to_vec();
        Ok(bytes)
    }

    pub fn fill(&self, address: Address, len: Size, byte: u8) -> RealmResult<()> {
        let (region, offset) = self.locate(address, len)?;
        region.lock()[offset..offset + len].fill(byte);
        Ok(())
    }

    /// Copy `len` bytes between two (possibly identical) regions
    pub fn copy(&self, src: Address, dst: Address, len: Size) -> RealmResult<()> {
        if len == 0 {
            return Ok(());
        }
        let (from, src_offset) = self.locate(src, len)?;
        let (to, dst_offset) = self.locate(dst, len)?;
        if Arc::ptr_eq(&from, &to) {
            from.lock()
                .copy_within(src_offset..src_offset + len, dst_offset);
        } else {
            let bytes = from.lock()[src_offset..src_offset + len].to_vec();
            to.lock()[dst_offset..dst_offset + len].copy_from_slice(&bytes);
        }
        Ok(())
    }

    pub fn read_u64(&self, address: Address) -> RealmResult<u64> {
        let bytes = self.read(address, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn write_u64(&self, address: Address, value: u64) -> RealmResult<()> {
        self.write(address, &value.to_le_bytes())
    }

    pub fn stats(&self) -> AddressSpaceStats {
        AddressSpaceStats {
            live_regions: self.regions.read().len(),
            live_bytes: self.used_bytes.load(Ordering::SeqCst),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
            total_maps: self.total_maps.load(Ordering::Relaxed) as u64,
            total_unmaps: self.total_unmaps.load(Ordering::Relaxed) as u64,
            heap_limit: self.heap_limit,
        }
    }

    fn region_at(&self, address: Address) -> RealmResult<Region> {
        self.regions.read().get(&address).cloned().ok_or_else(|| {
            RealmError::invalid(format!("0x{:x} is not the base of a live region", address))
        })
    }

    /// Find the region wholly containing `[address, address + len)`
    fn locate(&self, address: Address, len: Size) -> RealmResult<(Region, usize)> {
        let regions = self.regions.read();
        if let Some((&base, region)) = regions.range(..=address).next_back() {
            let offset = address - base;
            let size = region.lock().len();
            if offset.checked_add(len).is_some_and(|end| end <= size) {
                return Ok((Arc::clone(region), offset));
            }
        }
        Err(RealmError::invalid(format!(
            "access of {} bytes at 0x{:x} is outside every live region",
            len, address
        )))
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("stats", &self.stats())
            .finish()
    }
}
