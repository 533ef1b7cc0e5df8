use alloc::sync::Arc;

use super::{Attribs, InsertStatus, Lookup, Space};
use crate::common::{Pfn, Vpn};
use crate::consts::{IO_BITMAP_BYTES, IO_MAP_MAX, IO_PORT_ORDER};
use crate::fpage::FpageKind;
use crate::memory::{QuotaBox, RamQuota};

type IoBitmap = [u8; IO_BITMAP_BYTES];

/// I/O port space backed by an x86-style permission bitmap, where a clear
/// bit grants access to the port.
///
/// The bitmap is allocated on the first insert and released again once the
/// last port is gone. Sigma0 owns every port without holding a bitmap.
#[derive(Debug)]
pub struct IoSpace {
    quota: Arc<RamQuota>,
    bitmap: Option<QuotaBox<IoBitmap>>,
    mapped: usize,
    sigma0: bool,
}

impl IoSpace {
    pub const BITMAP_BYTES: usize = IO_BITMAP_BYTES;

    pub fn new(quota: Arc<RamQuota>) -> Self {
        Self {
            quota,
            bitmap: None,
            mapped: 0,
            sigma0: false,
        }
    }

    /// The port owner: every port is implicitly mapped.
    pub fn new_sigma0(quota: Arc<RamQuota>) -> Self {
        Self {
            sigma0: true,
            ..Self::new(quota)
        }
    }

    pub fn is_sigma0(&self) -> bool {
        self.sigma0
    }

    /// Number of ports this space may access.
    pub fn mapped_ports(&self) -> usize {
        if self.sigma0 {
            IO_MAP_MAX
        } else {
            self.mapped
        }
    }

    pub fn has_bitmap(&self) -> bool {
        self.bitmap.is_some()
    }

    fn port_allowed(&self, port: usize) -> bool {
        self.bitmap
            .as_ref()
            .map_or(false, |bitmap| bitmap[port / 8] & (1 << (port % 8)) == 0)
    }

    fn bitmap_mut(&mut self) -> Result<&mut IoBitmap, InsertStatus> {
        if self.bitmap.is_none() {
            let bitmap = QuotaBox::new_with(&self.quota, || [0xff; IO_BITMAP_BYTES])
                .map_err(|_| InsertStatus::ErrNomem)?;
            self.bitmap = Some(bitmap);
        }
        match self.bitmap.as_mut() {
            Some(bitmap) => Ok(&mut **bitmap),
            None => Err(InsertStatus::ErrNomem),
        }
    }

    fn release_if_empty(&mut self) {
        if self.mapped == 0 && self.bitmap.take().is_some() {
            log::trace!("io: bitmap released");
        }
    }
}

impl Space for IoSpace {
    const KIND: FpageKind = FpageKind::Io;
    const SUPERPAGE_ORDER: u32 = IO_PORT_ORDER;
    const HAS_SUPERPAGE: bool = true;
    const MAP_MAX: usize = IO_MAP_MAX;
    const IDENTITY_MAP: bool = true;

    fn v_insert(&mut self, phys: Pfn, virt: Vpn, order: u32, _attribs: Attribs) -> InsertStatus {
        if phys.get() != virt.get() || !self.is_mappable(virt, order) {
            return InsertStatus::ErrExists;
        }
        if self.sigma0 || self.mapped == IO_MAP_MAX {
            return InsertStatus::WarnExists;
        }

        if order == IO_PORT_ORDER {
            let bitmap = match self.bitmap_mut() {
                Ok(bitmap) => bitmap,
                Err(status) => return status,
            };
            bitmap.fill(0);
            self.mapped = IO_MAP_MAX;
            return InsertStatus::Ok;
        }

        let port = virt.get();
        if self.port_allowed(port) {
            return InsertStatus::WarnExists;
        }
        let bitmap = match self.bitmap_mut() {
            Ok(bitmap) => bitmap,
            Err(status) => return status,
        };
        bitmap[port / 8] &= !(1 << (port % 8));
        self.mapped += 1;
        InsertStatus::Ok
    }

    fn v_lookup(&self, virt: Vpn) -> Option<Lookup> {
        let port = virt.get();
        if port >= IO_MAP_MAX {
            return None;
        }
        if self.sigma0 || self.mapped == IO_MAP_MAX {
            return Some(Lookup {
                phys: Pfn::new(0),
                order: IO_PORT_ORDER,
                attribs: Attribs::RW,
            });
        }
        self.port_allowed(port).then_some(Lookup {
            phys: Pfn::new(port),
            order: 0,
            attribs: Attribs::RW,
        })
    }

    fn v_delete(&mut self, virt: Vpn, order: u32, mask: Attribs) -> Attribs {
        // Ports have no partial rights, and sigma0 never loses a port.
        if self.sigma0 || !mask.removes_mapping() {
            return Attribs::empty();
        }

        let start = virt.align_down(order).get();
        let end = start.saturating_add(1 << order).min(IO_MAP_MAX);
        let Some(bitmap) = self.bitmap.as_mut() else {
            return Attribs::empty();
        };

        let mut removed = 0;
        for port in start..end {
            let bit = 1 << (port % 8);
            if bitmap[port / 8] & bit == 0 {
                bitmap[port / 8] |= bit;
                removed += 1;
            }
        }
        self.mapped -= removed;
        self.release_if_empty();

        if removed == 0 {
            Attribs::empty()
        } else {
            Attribs::RW
        }
    }

    fn is_mappable(&self, virt: Vpn, order: u32) -> bool {
        (order == 0 || order == IO_PORT_ORDER)
            && virt.is_aligned(order)
            && virt.get() + (1 << order) <= IO_MAP_MAX
    }
}
