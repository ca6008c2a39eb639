//! Host-memory emulation of an accelerator.
//!
//! Device memory is ordinary heap memory aligned to 256 bytes, so device
//! pointers are real addresses and copies are `ptr::copy`. Work enqueued on a
//! stream is held back until the stream is synchronized, destroyed, or waited
//! on through an event, which keeps "enqueued" and "completed" observably
//! different.

use std::alloc::Layout;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::driver::*;

const SIM_ALIGNMENT: usize = 256;
const DEFAULT_STREAM: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // No destructor, so still readable while other thread locals are torn down.
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Stable per-thread key for the simulated current device.
fn thread_token() -> u64 {
    THREAD_TOKEN.with(|t| {
        if t.get() == 0 {
            t.set(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        t.get()
    })
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Copy { dst: usize, src: usize, len: usize },
    /// Run `stream` up to and including op `upto`.
    Wait { stream: u64, upto: u64 },
}

#[derive(Debug)]
struct SimStream {
    device: CUdevice,
    queue: VecDeque<(u64, Op)>,
    next_seq: u64,
}

impl SimStream {
    fn new(device: CUdevice) -> Self {
        Self {
            device,
            queue: VecDeque::new(),
            next_seq: 1,
        }
    }

    fn push(&mut self, op: Op) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back((seq, op));
    }

    fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

#[derive(Debug, Clone, Copy)]
struct SimAllocation {
    device: CUdevice,
    size: usize,
}

#[derive(Debug, Default)]
struct SimState {
    /// Device allocations by base address.
    allocations: BTreeMap<usize, SimAllocation>,
    /// Registered host ranges: start -> length.
    registered: BTreeMap<usize, usize>,
    streams: HashMap<u64, SimStream>,
    /// Event id -> (stream, seq) captured by the last record.
    events: HashMap<u64, Option<(u64, u64)>>,
    next_handle: u64,
    events_created: usize,
}

impl SimState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn allocation_containing(&self, addr: usize, len: usize) -> Option<SimAllocation> {
        let (&base, alloc) = self.allocations.range(..=addr).next_back()?;
        let end = base.checked_add(alloc.size)?;
        (addr.checked_add(len)? <= end && addr < end).then_some(*alloc)
    }

    fn registered_contains(&self, addr: usize) -> bool {
        self.registered
            .range(..=addr)
            .next_back()
            .is_some_and(|(&start, &len)| addr < start + len)
    }

    fn overlaps_registered(&self, start: usize, len: usize) -> bool {
        let end = start + len;
        if self.registered_contains(start) {
            return true;
        }
        self.registered.range(start..end).next().is_some()
    }

    /// Execute the queued ops of `stream` with sequence number <= `upto`.
    fn run_until(&mut self, stream: u64, upto: u64) {
        loop {
            let op = match self.streams.get_mut(&stream) {
                Some(s) => match s.queue.front() {
                    Some(&(seq, op)) if seq <= upto => {
                        s.queue.pop_front();
                        op
                    }
                    _ => return,
                },
                None => return,
            };
            match op {
                Op::Copy { dst, src, len } => {
                    trace!("sim stream {}: copy {} bytes {:#x} -> {:#x}", stream, len, src, dst);
                    // SAFETY: both ranges were validated when the copy was
                    // enqueued and the caller keeps them alive until the
                    // stream completes.
                    unsafe { std::ptr::copy(src as *const u8, dst as *mut u8, len) };
                }
                Op::Wait { stream: other, upto } => self.run_until(other, upto),
            }
        }
    }

    fn drain(&mut self, stream: u64) {
        self.run_until(stream, u64::MAX);
    }

    fn drain_all(&mut self) {
        let ids: Vec<u64> = self.streams.keys().copied().collect();
        for id in ids {
            self.drain(id);
        }
    }
}

impl Drop for SimState {
    fn drop(&mut self) {
        for (&base, alloc) in &self.allocations {
            if let Ok(layout) = Layout::from_size_align(alloc.size, SIM_ALIGNMENT) {
                // SAFETY: allocated in `mem_alloc` with this exact layout.
                unsafe { std::alloc::dealloc(base as *mut u8, layout) };
            }
        }
    }
}

/// A simulated accelerator with a fixed number of devices.
pub struct SimDriver {
    device_count: i32,
    state: Mutex<SimState>,
    current_device: DashMap<u64, CUdevice>,
    last_error: DashMap<u64, CUresult>,
    /// Non-zero: every pointer query fails with this code.
    pointer_failure: AtomicI32,
    pointer_probes: AtomicUsize,
}

impl SimDriver {
    pub fn new(device_count: u32) -> Self {
        let mut state = SimState::default();
        state.streams.insert(DEFAULT_STREAM, SimStream::new(0));
        debug!("simulated accelerator with {} device(s)", device_count);
        Self {
            device_count: i32::try_from(device_count).unwrap_or(i32::MAX),
            state: Mutex::new(state),
            current_device: DashMap::new(),
            last_error: DashMap::new(),
            pointer_failure: AtomicI32::new(CUDA_SUCCESS),
            pointer_probes: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent pointer query fail with `code`, as a driver in
    /// a forked child or without a usable context would.
    pub fn fail_pointer_queries(&self, code: CUresult) {
        self.pointer_failure.store(code, Ordering::SeqCst);
    }

    pub fn restore_pointer_queries(&self) {
        self.pointer_failure.store(CUDA_SUCCESS, Ordering::SeqCst);
    }

    /// Number of pointer queries answered so far.
    pub fn pointer_probes(&self) -> usize {
        self.pointer_probes.load(Ordering::SeqCst)
    }

    /// Sticky error left on the calling thread by a failed query.
    pub fn last_error(&self) -> Option<CUresult> {
        self.last_error.get(&thread_token()).map(|e| *e)
    }

    pub fn current_device(&self) -> Option<CUdevice> {
        self.current_device.get(&thread_token()).map(|d| *d)
    }

    /// Streams other than the default stream.
    pub fn live_streams(&self) -> usize {
        self.state.lock().streams.len() - 1
    }

    pub fn live_events(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn events_created(&self) -> usize {
        self.state.lock().events_created
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn live_registrations(&self) -> usize {
        self.state.lock().registered.len()
    }

    /// Ops enqueued on `stream` that have not run yet.
    pub fn pending_ops(&self, stream: CUstream) -> usize {
        self.state
            .lock()
            .streams
            .get(&(stream as u64))
            .map_or(0, |s| s.queue.len())
    }

    fn check_device(&self, device: CUdevice) -> DriverResult<()> {
        if self.device_count == 0 {
            return Err(CUDA_ERROR_NO_DEVICE);
        }
        if device < 0 || device >= self.device_count {
            return Err(CUDA_ERROR_INVALID_DEVICE);
        }
        Ok(())
    }

    fn require_current(&self) -> DriverResult<CUdevice> {
        self.current_device().ok_or(CUDA_ERROR_INVALID_CONTEXT)
    }

    fn set_last_error(&self, code: CUresult) {
        self.last_error.insert(thread_token(), code);
    }

    fn enqueue_copy(
        &self,
        state: &mut SimState,
        stream: CUstream,
        dst: usize,
        src: usize,
        len: usize,
    ) -> DriverResult<()> {
        let stream = state
            .streams
            .get_mut(&(stream as u64))
            .ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if len > 0 {
            stream.push(Op::Copy { dst, src, len });
        }
        Ok(())
    }
}

impl Driver for SimDriver {
    fn device_get_count(&self) -> DriverResult<i32> {
        Ok(self.device_count)
    }

    fn device_get_attribute(&self, attrib: i32, device: CUdevice) -> DriverResult<i32> {
        self.check_device(device)?;
        match attrib {
            CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK => Ok(1024),
            CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X => Ok(1024),
            CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y => Ok(1024),
            CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z => Ok(64),
            CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK => Ok(48 << 10),
            CU_DEVICE_ATTRIBUTE_WARP_SIZE => Ok(32),
            CU_DEVICE_ATTRIBUTE_CLOCK_RATE => Ok(1_410_000),
            CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT => Ok(108),
            CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR => Ok(8),
            CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR => Ok(0),
            _ => Err(CUDA_ERROR_INVALID_VALUE),
        }
    }

    fn device_get_name(&self, device: CUdevice) -> DriverResult<String> {
        self.check_device(device)?;
        Ok(format!("Simulated Accelerator {}", device))
    }

    fn set_current_device(&self, device: CUdevice) -> DriverResult<()> {
        self.check_device(device)?;
        self.current_device.insert(thread_token(), device);
        Ok(())
    }

    fn mem_alloc(&self, byte_size: usize) -> DriverResult<CUdeviceptr> {
        let device = self.require_current()?;
        let size = byte_size.max(1);
        let layout =
            Layout::from_size_align(size, SIM_ALIGNMENT).map_err(|_| CUDA_ERROR_OUT_OF_MEMORY)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(CUDA_ERROR_OUT_OF_MEMORY);
        }
        self.state
            .lock()
            .allocations
            .insert(ptr as usize, SimAllocation { device, size });
        trace!("sim alloc {} bytes on device {} at {:p}", size, device, ptr);
        Ok(ptr as CUdeviceptr)
    }

    fn mem_free(&self, dptr: CUdeviceptr) -> DriverResult<()> {
        let mut state = self.state.lock();
        // Freeing implicitly synchronizes, like the real driver.
        state.drain_all();
        let alloc = state
            .allocations
            .remove(&(dptr as usize))
            .ok_or(CUDA_ERROR_INVALID_VALUE)?;
        let layout = Layout::from_size_align(alloc.size, SIM_ALIGNMENT)
            .map_err(|_| CUDA_ERROR_INVALID_VALUE)?;
        // SAFETY: allocated in `mem_alloc` with this exact layout.
        unsafe { std::alloc::dealloc(dptr as usize as *mut u8, layout) };
        Ok(())
    }

    unsafe fn memcpy_htod_async(
        &self,
        dst: CUdeviceptr,
        src: *const c_void,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        if byte_count > 0 && state.allocation_containing(dst as usize, byte_count).is_none() {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        self.enqueue_copy(&mut state, stream, dst as usize, src as usize, byte_count)
    }

    unsafe fn memcpy_dtoh_async(
        &self,
        dst: *mut c_void,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        if byte_count > 0 && state.allocation_containing(src as usize, byte_count).is_none() {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        self.enqueue_copy(&mut state, stream, dst as usize, src as usize, byte_count)
    }

    unsafe fn memcpy_dtod_async(
        &self,
        dst: CUdeviceptr,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        if byte_count > 0
            && (state.allocation_containing(dst as usize, byte_count).is_none()
                || state.allocation_containing(src as usize, byte_count).is_none())
        {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        self.enqueue_copy(&mut state, stream, dst as usize, src as usize, byte_count)
    }

    unsafe fn memcpy_peer_async(
        &self,
        dst: CUdeviceptr,
        dst_device: CUdevice,
        src: CUdeviceptr,
        src_device: CUdevice,
        byte_count: usize,
        stream: CUstream,
    ) -> DriverResult<()> {
        self.check_device(dst_device)?;
        self.check_device(src_device)?;
        let mut state = self.state.lock();
        if byte_count > 0 {
            let on = |addr: CUdeviceptr, device: CUdevice| {
                state
                    .allocation_containing(addr as usize, byte_count)
                    .is_some_and(|a| a.device == device)
            };
            if !on(dst, dst_device) || !on(src, src_device) {
                return Err(CUDA_ERROR_INVALID_VALUE);
            }
        }
        self.enqueue_copy(&mut state, stream, dst as usize, src as usize, byte_count)
    }

    fn stream_create(&self, flags: u32) -> DriverResult<CUstream> {
        let device = self.require_current()?;
        let mut state = self.state.lock();
        let id = state.handle();
        state.streams.insert(id, SimStream::new(device));
        debug!("sim stream {} created on device {} (flags={:#x})", id, device, flags);
        Ok(id as usize as CUstream)
    }

    fn stream_destroy(&self, stream: CUstream) -> DriverResult<()> {
        let id = stream as u64;
        if id == DEFAULT_STREAM {
            return Err(CUDA_ERROR_INVALID_HANDLE);
        }
        let mut state = self.state.lock();
        if !state.streams.contains_key(&id) {
            return Err(CUDA_ERROR_INVALID_HANDLE);
        }
        // Work already enqueued still completes.
        state.drain(id);
        if let Some(s) = state.streams.remove(&id) {
            debug!("sim stream {} destroyed (device {})", id, s.device);
        }
        Ok(())
    }

    fn stream_synchronize(&self, stream: CUstream) -> DriverResult<()> {
        let id = stream as u64;
        let mut state = self.state.lock();
        if !state.streams.contains_key(&id) {
            return Err(CUDA_ERROR_INVALID_HANDLE);
        }
        state.drain(id);
        Ok(())
    }

    fn stream_wait_event(&self, stream: CUstream, event: CUevent, _flags: u32) -> DriverResult<()> {
        let mut state = self.state.lock();
        let recorded = *state
            .events
            .get(&(event as u64))
            .ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        let target = state
            .streams
            .get_mut(&(stream as u64))
            .ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        // Waiting on a never-recorded event is a no-op.
        if let Some((stream, upto)) = recorded {
            target.push(Op::Wait { stream, upto });
        }
        Ok(())
    }

    fn event_create(&self, _flags: u32) -> DriverResult<CUevent> {
        self.require_current()?;
        let mut state = self.state.lock();
        let id = state.handle();
        state.events.insert(id, None);
        state.events_created += 1;
        Ok(id as usize as CUevent)
    }

    fn event_record(&self, event: CUevent, stream: CUstream) -> DriverResult<()> {
        let mut state = self.state.lock();
        let seq = state
            .streams
            .get(&(stream as u64))
            .ok_or(CUDA_ERROR_INVALID_HANDLE)?
            .last_seq();
        let slot = state
            .events
            .get_mut(&(event as u64))
            .ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        *slot = Some((stream as u64, seq));
        Ok(())
    }

    fn event_destroy(&self, event: CUevent) -> DriverResult<()> {
        self.state
            .lock()
            .events
            .remove(&(event as u64))
            .map(|_| ())
            .ok_or(CUDA_ERROR_INVALID_HANDLE)
    }

    unsafe fn mem_host_register(
        &self,
        ptr: *mut c_void,
        byte_size: usize,
        _flags: u32,
    ) -> DriverResult<()> {
        if ptr.is_null() || byte_size == 0 {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let mut state = self.state.lock();
        let start = ptr as usize;
        if state.overlaps_registered(start, byte_size) {
            return Err(CUDA_ERROR_HOST_MEMORY_ALREADY_REGISTERED);
        }
        state.registered.insert(start, byte_size);
        Ok(())
    }

    unsafe fn mem_host_unregister(&self, ptr: *mut c_void) -> DriverResult<()> {
        self.state
            .lock()
            .registered
            .remove(&(ptr as usize))
            .map(|_| ())
            .ok_or(CUDA_ERROR_HOST_MEMORY_NOT_REGISTERED)
    }

    fn pointer_memory_type(&self, ptr: CUdeviceptr) -> DriverResult<u32> {
        self.pointer_probes.fetch_add(1, Ordering::SeqCst);
        let failure = self.pointer_failure.load(Ordering::SeqCst);
        if failure != CUDA_SUCCESS {
            self.set_last_error(failure);
            return Err(failure);
        }
        let state = self.state.lock();
        let addr = ptr as usize;
        if state.allocation_containing(addr, 0).is_some() {
            Ok(CU_MEMORYTYPE_DEVICE)
        } else if state.registered_contains(addr) {
            Ok(CU_MEMORYTYPE_HOST)
        } else {
            self.set_last_error(CUDA_ERROR_INVALID_VALUE);
            Err(CUDA_ERROR_INVALID_VALUE)
        }
    }

    fn clear_last_error(&self) {
        self.last_error.remove(&thread_token());
    }
}
