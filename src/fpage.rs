//! # Flexpages
//!
//! A flexpage describes a naturally aligned, power-of-two sized region of one
//! of the kernel's address spaces. It travels in one machine word:
//!
//! ```text
//!  63                    13 12     7 6   4  3   2   1   0
//! +------------------------+--------+-----+---+---+---+---+
//! |        base            | order  | type| G | R | W | X |
//! +------------------------+--------+-----+---+---+---+---+
//! ```
//!
//! `base` and `order` count units of the addressed space: 4 KiB pages for
//! memory, single ports for I/O, single slots for capabilities and objects.
//! An order of [`WHOLE_SPACE`] selects the complete space; a nil-type fpage
//! with that order selects every space at once.

use bitfield::bitfield;
use bitflags::bitflags;

use crate::consts::WHOLE_SPACE;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RawFpage(u64);
    impl Debug;
    pub u8, rights, set_rights: 2, 0;
    pub grant, set_grant: 3;
    pub u8, kind, set_kind: 6, 4;
    pub u8, order, set_order: 12, 7;
    pub u64, base, set_base: 63, 13;
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FpageRights: u8 {
        const X = 1 << 0;
        const W = 1 << 1;
        const R = 1 << 2;

        const RW = Self::R.bits() | Self::W.bits();
        const RX = Self::R.bits() | Self::X.bits();
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FpageKind {
    Nil,
    Memory,
    Io,
    Obj,
    Cap,
}

impl FpageKind {
    fn from_raw(raw: u8) -> FpageKind {
        match raw {
            1 => FpageKind::Memory,
            2 => FpageKind::Io,
            3 => FpageKind::Obj,
            4 => FpageKind::Cap,
            _ => FpageKind::Nil,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            FpageKind::Nil => 0,
            FpageKind::Memory => 1,
            FpageKind::Io => 2,
            FpageKind::Obj => 3,
            FpageKind::Cap => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlexPage {
    kind: FpageKind,
    base: usize,
    order: u8,
    rights: FpageRights,
    grant: bool,
}

impl FlexPage {
    fn new(kind: FpageKind, base: usize, order: u8, rights: FpageRights) -> Self {
        let order = order.min(WHOLE_SPACE);
        let base = if order >= WHOLE_SPACE {
            0
        } else {
            base & !((1usize << order) - 1)
        };
        Self {
            kind,
            base,
            order,
            rights,
            grant: false,
        }
    }

    pub fn nil() -> Self {
        Self::new(FpageKind::Nil, 0, 0, FpageRights::empty())
    }

    /// The fpage naming every address space of the task.
    pub fn all_spaces(rights: FpageRights) -> Self {
        Self::new(FpageKind::Nil, 0, WHOLE_SPACE, rights)
    }

    pub fn memory(page: usize, order: u8, rights: FpageRights) -> Self {
        Self::new(FpageKind::Memory, page, order, rights)
    }

    pub fn io(port: usize, order: u8) -> Self {
        Self::new(FpageKind::Io, port, order, FpageRights::RW)
    }

    pub fn cap(slot: usize, order: u8) -> Self {
        Self::new(FpageKind::Cap, slot, order, FpageRights::RW)
    }

    pub fn obj(slot: usize, order: u8, rights: FpageRights) -> Self {
        Self::new(FpageKind::Obj, slot, order, rights)
    }

    pub fn with_grant(mut self, grant: bool) -> Self {
        self.grant = grant;
        self
    }

    /// Decode a flexpage from its wire word. Base bits below the order are
    /// ignored.
    pub fn from_raw(word: u64) -> Self {
        let raw = RawFpage(word);
        let mut fpage = Self::new(
            FpageKind::from_raw(raw.kind()),
            raw.base() as usize,
            raw.order(),
            FpageRights::from_bits_truncate(raw.rights()),
        );
        fpage.grant = raw.grant();
        fpage
    }

    pub fn to_raw(&self) -> u64 {
        let mut raw = RawFpage(0);
        raw.set_rights(self.rights.bits());
        raw.set_grant(self.grant);
        raw.set_kind(self.kind.to_raw());
        raw.set_order(self.order);
        raw.set_base(self.base as u64);
        raw.0
    }

    pub fn kind(&self) -> FpageKind {
        self.kind
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn rights(&self) -> FpageRights {
        self.rights
    }

    pub fn is_grant(&self) -> bool {
        self.grant
    }

    pub fn is_whole_space(&self) -> bool {
        self.order >= WHOLE_SPACE
    }

    pub fn is_all_spaces(&self) -> bool {
        self.kind == FpageKind::Nil && self.is_whole_space()
    }

    pub fn is_nil(&self) -> bool {
        self.kind == FpageKind::Nil && !self.is_whole_space()
    }

    /// Size in units, clamped to a space of `1 << max_order` units.
    pub fn size_in(&self, max_order: u32) -> usize {
        1 << u32::from(self.order).min(max_order)
    }
}
