//! Host/device disambiguation for byte copies.

use super::DeviceBuffer;

/// Where one side of a copy lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Host,
    Device,
}

/// Direction of a copy, with the two-bit encoding generated code passes around.
///
/// Bit 0 set means the destination is a device buffer, bit 1 set means the
/// source is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CopyKind {
    HostToHost = 0,
    HostToDevice = 1,
    DeviceToHost = 2,
    DeviceToDevice = 3,
}

impl CopyKind {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(CopyKind::HostToHost),
            1 => Some(CopyKind::HostToDevice),
            2 => Some(CopyKind::DeviceToHost),
            3 => Some(CopyKind::DeviceToDevice),
            _ => None,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub const fn from_sides(dst: MemoryKind, src: MemoryKind) -> Self {
        match (dst, src) {
            (MemoryKind::Host, MemoryKind::Host) => CopyKind::HostToHost,
            (MemoryKind::Device, MemoryKind::Host) => CopyKind::HostToDevice,
            (MemoryKind::Host, MemoryKind::Device) => CopyKind::DeviceToHost,
            (MemoryKind::Device, MemoryKind::Device) => CopyKind::DeviceToDevice,
        }
    }

    pub const fn dst(self) -> MemoryKind {
        if self.bits() & 1 != 0 { MemoryKind::Device } else { MemoryKind::Host }
    }

    pub const fn src(self) -> MemoryKind {
        if self.bits() & 2 != 0 { MemoryKind::Device } else { MemoryKind::Host }
    }
}

/// One side of a copy: a raw host address or a device buffer whose backing
/// memory is resolved at copy time.
///
/// `HostReadOnly` may only be a copy source.
#[derive(Debug)]
pub enum CopyOperand<'a, B> {
    Host(*mut u8),
    HostReadOnly(*const u8),
    Device(&'a B),
}

impl<B> Clone for CopyOperand<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for CopyOperand<'_, B> {}

impl<'a, B: DeviceBuffer> CopyOperand<'a, B> {
    /// Wrap a read-only host pointer for use as a copy source.
    pub fn host_src(ptr: *const u8) -> Self {
        CopyOperand::HostReadOnly(ptr)
    }

    pub fn host_slice(slice: &'a [u8]) -> Self {
        Self::host_src(slice.as_ptr())
    }

    pub fn host_slice_mut(slice: &'a mut [u8]) -> Self {
        CopyOperand::Host(slice.as_mut_ptr())
    }

    pub fn kind(&self) -> MemoryKind {
        match self {
            CopyOperand::Host(_) | CopyOperand::HostReadOnly(_) => MemoryKind::Host,
            CopyOperand::Device(_) => MemoryKind::Device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_through_sides() {
        for bits in 0u8..4 {
            let kind = CopyKind::from_bits(bits).expect("valid bits");
            assert_eq!(kind.bits(), bits);
            assert_eq!(CopyKind::from_sides(kind.dst(), kind.src()), kind);
        }
        assert_eq!(CopyKind::from_bits(4), None);
    }

    #[test]
    fn bit_zero_marks_device_destination() {
        assert_eq!(CopyKind::HostToDevice.dst(), MemoryKind::Device);
        assert_eq!(CopyKind::HostToDevice.src(), MemoryKind::Host);
        assert_eq!(CopyKind::DeviceToHost.dst(), MemoryKind::Host);
        assert_eq!(CopyKind::DeviceToHost.src(), MemoryKind::Device);
    }
}
