//! Tagged 64-bit address identifiers and the address interner.
//!
//! Bit 63 marks data addresses (heap/stack), bit 62 distinguishes heap from
//! stack when set. The remaining bits carry either (image id, offset) or
//! (shared allocation id, offset). Each id is formatted once on first sight
//! and the string is cached for the report writers.

use crate::symbols::SymbolResolver;
use crate::trace::ImageFileInfo;
use std::collections::HashMap;

/// Data-address flag (bit 63)
pub const MEMORY_FLAG: u64 = 1 << 63;

/// Heap flag (bit 62, valid when the memory flag is set)
pub const HEAP_FLAG: u64 = 1 << 62;

/// Shared allocation id reserved for unmapped stack memory
pub const UNMAPPED_STACK_ID: u64 = 0;

/// Shared allocation id reserved for unmapped heap memory
pub const UNMAPPED_HEAP_ID: u64 = 1;

const ID_MASK: u64 = 0x3FFF_FFFF;

/// Interns (image, offset) and (allocation, offset) pairs as tagged ids
/// with a cached human-readable rendering.
///
/// **Public** - shared by the merge engine and the report writers
pub struct AddressFormatter {
    resolver: Box<dyn SymbolResolver>,
    images: HashMap<u32, ImageFileInfo>,
    cache: HashMap<u64, String>,
}

impl AddressFormatter {
    /// Create a formatter that renders through the given symbol resolver
    ///
    /// **Public** - constructor
    pub fn new(resolver: Box<dyn SymbolResolver>) -> Self {
        Self {
            resolver,
            images: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Register an image from a trace prefix table
    ///
    /// **Public** - called by the merger for every loaded trace
    ///
    /// Image ids are stable across the traces of one analysis run, so
    /// re-registering an already-known id is a no-op.
    pub fn register_image(&mut self, image: &ImageFileInfo) {
        self.images.entry(image.id).or_insert_with(|| image.clone());
    }

    /// Intern a code address inside an image
    ///
    /// **Public** - main entry point for code addresses
    pub fn intern_image(&mut self, image_id: u32, offset: u32) -> u64 {
        let id = ((image_id as u64 & ID_MASK) << 32) | offset as u64;

        if !self.cache.contains_key(&id) {
            let formatted = match self.images.get(&image_id) {
                Some(image) => self.resolver.format_address(image, offset),
                None => format!("<image #{}>+0x{:x}", image_id, offset),
            };
            self.cache.insert(id, formatted);
        }

        id
    }

    /// Intern a data address inside a shared allocation
    ///
    /// **Public** - main entry point for data addresses
    pub fn intern_memory(&mut self, allocation_id: u64, offset: u32, is_heap: bool) -> u64 {
        let mut id = MEMORY_FLAG | ((allocation_id & ID_MASK) << 32) | offset as u64;
        if is_heap {
            id |= HEAP_FLAG;
        }

        self.cache
            .entry(id)
            .or_insert_with(|| format_memory(allocation_id, offset, is_heap));

        id
    }

    /// Render a previously interned id
    ///
    /// **Public** - used by the report writers
    ///
    /// Ids that were never interned (e.g. the target of a not-taken branch)
    /// render as `<?>`.
    pub fn format(&self, id: u64) -> &str {
        self.cache.get(&id).map_or("<?>", String::as_str)
    }
}

/// Render a data address as `S#<id>+<hex>` / `H#<id>+<hex>`
///
/// **Private** - internal rendering helper
///
/// The unmapped sentinels render their id as `?`.
fn format_memory(allocation_id: u64, offset: u32, is_heap: bool) -> String {
    let prefix = if is_heap { 'H' } else { 'S' };
    let unmapped = allocation_id == UNMAPPED_STACK_ID || allocation_id == UNMAPPED_HEAP_ID;
    if unmapped {
        format!("{}#?+{:x}", prefix, offset)
    } else {
        format!("{}#{}+{:x}", prefix, allocation_id, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::OffsetResolver;

    fn formatter() -> AddressFormatter {
        let mut formatter = AddressFormatter::new(Box::new(OffsetResolver));
        formatter.register_image(&ImageFileInfo {
            id: 3,
            low: 0x40_0000,
            high: 0x50_0000,
            name: "target.so".to_string(),
        });
        formatter
    }

    #[test]
    fn test_image_id_layout() {
        let mut f = formatter();
        let id = f.intern_image(3, 0x21c4);

        assert_eq!(id & MEMORY_FLAG, 0);
        assert_eq!(id >> 32, 3);
        assert_eq!(id & 0xFFFF_FFFF, 0x21c4);
        assert_eq!(f.format(id), "target.so+0x21c4");
    }

    #[test]
    fn test_memory_id_flags() {
        let mut f = formatter();
        let heap = f.intern_memory(7, 0x10, true);
        let stack = f.intern_memory(8, 0x10, false);

        assert_ne!(heap & MEMORY_FLAG, 0);
        assert_ne!(heap & HEAP_FLAG, 0);
        assert_ne!(stack & MEMORY_FLAG, 0);
        assert_eq!(stack & HEAP_FLAG, 0);
        assert_eq!(f.format(heap), "H#7+10");
        assert_eq!(f.format(stack), "S#8+10");
    }

    #[test]
    fn test_unmapped_sentinels_render_as_question_mark() {
        let mut f = formatter();
        let stack = f.intern_memory(UNMAPPED_STACK_ID, 0x1c, false);
        let heap = f.intern_memory(UNMAPPED_HEAP_ID, 0, true);

        assert_eq!(f.format(stack), "S#?+1c");
        assert_eq!(f.format(heap), "H#?+0");
    }

    #[test]
    fn test_unknown_ids_render_placeholder() {
        let f = formatter();
        assert_eq!(f.format(0), "<?>");
    }

    #[test]
    fn test_unknown_image_falls_back_to_numeric_name() {
        let mut f = formatter();
        let id = f.intern_image(9, 0x4);
        assert_eq!(f.format(id), "<image #9>+0x4");
    }
}
