// Because the memory map is so important to not be aliased, it is defined here, in one place.
//
// Every backend counts addresses in its own "page" unit: 4 KiB frames for
// memory, single ports for I/O, single slots for capabilities and objects.
// All orders below are log2 of a size in those units.

/// log2 of the hardware page size in bytes
pub const PAGE_SHIFT: u32 = 12;

/// Order of a memory superpage in pages (4 MiB)
pub const MEM_SUPERPAGE_ORDER: u32 = 10;
/// Page table entries per table, one table spans one superpage
pub const MEM_TABLE_ENTRIES: usize = 1 << MEM_SUPERPAGE_ORDER;
/// End of user-mappable virtual memory, in pages (3 GiB)
pub const MEM_MAP_MAX: usize = 0xC000_0000 >> PAGE_SHIFT;

/// Number of I/O ports, the whole port space is one superpage
pub const IO_PORT_ORDER: u32 = 16;
pub const IO_MAP_MAX: usize = 1 << IO_PORT_ORDER;
/// Size of the I/O permission bitmap in bytes
pub const IO_BITMAP_BYTES: usize = IO_MAP_MAX / 8;

/// Number of task capability slots; the whole slot space is one superpage
pub const CAP_SLOT_ORDER: u32 = 11;
pub const CAP_MAP_MAX: usize = 1 << CAP_SLOT_ORDER;
/// Capability bitmap words
pub const CAP_BITMAP_WORDS: usize = CAP_MAP_MAX / usize::BITS as usize;

/// Number of kernel-object slots per object space
pub const OBJ_MAP_MAX: usize = 1 << 16;
/// Slots are allocated in chunks of this order
pub const OBJ_CHUNK_ORDER: u32 = 9;
pub const OBJ_CHUNK_SLOTS: usize = 1 << OBJ_CHUNK_ORDER;

/// Fpage order meaning "the complete address space"
pub const WHOLE_SPACE: u8 = 63;

/// Largest number of page-size classes a mapping database is configured with
pub const MAX_SIZE_CLASSES: usize = 4;
