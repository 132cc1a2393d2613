//! Mark-and-sweep garbage collector.
//!
//! Each thread owns one [`Heap`] holding its owned strings and native
//! objects. Collection is stop-the-world and runs only between VM
//! instructions, so a partially constructed stack frame can never be
//! observed. The trigger is object-count based: when the live count
//! reaches the threshold at the end of an instruction, the thread
//! collects, and the threshold becomes twice the surviving count.
//!
//! Objects live in slots addressed by [`HeapId`]; freed slots go on a
//! free list for reuse. Sweeping visits slots in order, so finalizers
//! run in a deterministic order within one collection.

use crate::ffi::NativeProps;
use crate::vm::Value;

/// Live-object threshold that arms the first collection.
pub const GC_INITIAL_THRESHOLD: usize = 8;

/// Handle to a heap-allocated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub(crate) u32);

/// An opaque host object tracked by the GC.
#[derive(Debug)]
pub struct NativeObject {
    /// Host payload pointer.
    pub addr: *mut (),
    /// Optional descriptor with mark/finalize/print callbacks.
    pub props: Option<&'static NativeProps>,
}

#[derive(Debug)]
enum HeapData {
    Str(String),
    Native(NativeObject),
}

#[derive(Debug)]
struct Slot {
    data: HeapData,
    marked: bool,
}

/// Garbage collector statistics.
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Completed collections.
    pub collections: usize,
    /// Objects freed across all collections.
    pub objects_freed: usize,
}

/// Collects reachable heap ids during the mark phase.
///
/// Native `protect` callbacks receive a marker and must feed it every
/// value their payload keeps alive.
#[derive(Debug, Default)]
pub struct Marker {
    pending: Vec<HeapId>,
}

impl Marker {
    /// Record a value as reachable.
    pub fn protect(&mut self, value: &Value) {
        if let Value::Str(id) | Value::Native(id) = value {
            self.pending.push(*id);
        }
    }
}

/// A per-thread heap of strings and native objects.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    live: usize,
    threshold: usize,
    stats: GcStats,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            threshold: GC_INITIAL_THRESHOLD,
            stats: GcStats::default(),
        }
    }

    fn insert(&mut self, data: HeapData) -> HeapId {
        self.live += 1;
        let slot = Slot {
            data,
            marked: false,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(slot);
                HeapId(idx)
            }
            None => {
                self.slots.push(Some(slot));
                HeapId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Allocate an owned string.
    pub fn alloc_str(&mut self, value: String) -> HeapId {
        self.insert(HeapData::Str(value))
    }

    /// Allocate a native object.
    pub fn alloc_native(&mut self, object: NativeObject) -> HeapId {
        self.insert(HeapData::Native(object))
    }

    /// The string at `id`, if it is a live string.
    pub fn str_value(&self, id: HeapId) -> Option<&str> {
        match &self.slots.get(id.0 as usize)?.as_ref()?.data {
            HeapData::Str(s) => Some(s),
            HeapData::Native(_) => None,
        }
    }

    /// The native object at `id`, if it is a live native.
    pub fn native(&self, id: HeapId) -> Option<&NativeObject> {
        match &self.slots.get(id.0 as usize)?.as_ref()?.data {
            HeapData::Native(n) => Some(n),
            HeapData::Str(_) => None,
        }
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.live
    }

    /// Collector statistics so far.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Whether the live count has reached the collection threshold.
    pub fn should_collect(&self) -> bool {
        self.live >= self.threshold
    }

    /// Run one mark-and-sweep collection over the given root sets.
    pub fn collect(&mut self, roots: &[&[Value]]) {
        // Mark: worklist seeded from the roots; native protect callbacks
        // extend it with whatever their payloads reference.
        let mut marker = Marker::default();
        for set in roots {
            for value in *set {
                marker.protect(value);
            }
        }
        while let Some(id) = marker.pending.pop() {
            let Some(slot) = self.slots.get_mut(id.0 as usize).and_then(Option::as_mut) else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            if let HeapData::Native(native) = &slot.data {
                if let Some(protect) = native.props.and_then(|p| p.protect) {
                    protect(&mut marker, native.addr);
                }
            }
        }

        // Sweep in slot order; finalizers run exactly once.
        for (idx, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            if slot.marked {
                slot.marked = false;
                continue;
            }
            if let HeapData::Native(native) = &slot.data {
                if let Some(finalize) = native.props.and_then(|p| p.finalize) {
                    finalize(native.addr);
                }
            }
            *entry = None;
            self.free.push(idx as u32);
            self.live -= 1;
            self.stats.objects_freed += 1;
        }

        self.stats.collections += 1;
        self.threshold = (self.live * 2).max(GC_INITIAL_THRESHOLD);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Thread teardown finalizes every remaining native.
        for entry in &mut self.slots {
            if let Some(Slot {
                data: HeapData::Native(native),
                ..
            }) = entry
            {
                if let Some(finalize) = native.props.and_then(|p| p.finalize) {
                    finalize(native.addr);
                }
            }
        }
    }
}
