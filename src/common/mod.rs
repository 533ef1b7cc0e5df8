#[macro_use]
pub mod int_like;

int_like!(SpaceId, usize);
int_like!(Pfn, usize);
int_like!(Vpn, usize);

impl Vpn {
    /// Distance in units from `base` to `self`.
    pub const fn offset_from(self, base: Vpn) -> usize {
        self.get() - base.get()
    }
}

impl Pfn {
    pub const fn offset_from(self, base: Pfn) -> usize {
        self.get() - base.get()
    }
}
