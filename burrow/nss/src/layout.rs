//! Packing of a resolved address into the caller's scratch buffer.
//!
//! The reentrant NSS interfaces hand this module a single byte buffer and
//! expect every structure the answer needs, hostname copy included, to be
//! placed inside it. Placement is computed up front as a layout descriptor;
//! a buffer that cannot hold the whole answer is rejected before a single
//! byte of it is written, so a failed call leaves it exactly as it was.
//!
//! All embedded pointers are absolute addresses into the same buffer.
//! Nothing here allocates.

use std::{mem, net::Ipv4Addr, ptr};

use libc::{c_char, c_int};
use thiserror::Error;

/// Why a result could not be packed. No bytes were written either way.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PackError {
    /// The buffer cannot hold the result; a retry with at least `required`
    /// bytes can succeed.
    #[error("buffer of {capacity} bytes cannot hold the result, {required} needed")]
    BufferTooSmall { required: usize, capacity: usize },
    /// The buffer does not start on a pointer boundary, so the scaffolding
    /// structures cannot be placed in it.
    #[error("buffer is not pointer-aligned")]
    MisalignedBuffer,
}

/// Alignment unit for everything placed in the buffer.
const PTR_SIZE: usize = mem::size_of::<*mut c_char>();

/// Length of an IPv4 address in bytes; `h_length` in the entry shape.
pub const ADDR_LEN: usize = 4;

/// `struct gaih_addrtuple` from glibc's resolver internals, the result
/// shape of the `gethostbyname4_r` interface. Not exported by the `libc`
/// crate.
#[repr(C)]
#[derive(Debug)]
pub struct GaihAddrtuple {
    /// Next tuple in the chain; always null here, one address per answer.
    pub next: *mut GaihAddrtuple,
    /// The resolved name, pointing at the hostname copy in the buffer.
    pub name: *mut c_char,
    /// Address family of `addr`.
    pub family: c_int,
    /// Address bytes in network order; an IPv4 answer occupies `addr[0]`.
    pub addr: [u32; 4],
    /// Interface scope, meaningless for IPv4.
    pub scopeid: u32,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + (align - 1)) & !(align - 1)
}

/// Placement of the tuple shape inside a buffer. Offsets are relative to
/// the buffer base, which must be pointer-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleLayout {
    /// NUL-terminated hostname copy.
    pub hostname: usize,
    /// The [`GaihAddrtuple`] itself.
    pub tuple: usize,
    /// Total bytes the shape occupies.
    pub required: usize,
}

impl TupleLayout {
    /// Computes placement for a hostname of `hostname_len` bytes, the NUL
    /// terminator excluded.
    pub fn new(hostname_len: usize) -> Self {
        let hostname = 0;
        let tuple = align_up(hostname_len + 1, PTR_SIZE);
        let required = tuple + align_up(mem::size_of::<GaihAddrtuple>(), PTR_SIZE);

        Self {
            hostname,
            tuple,
            required,
        }
    }
}

/// Placement of the entry (`struct hostent`) shape inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLayout {
    /// NUL-terminated hostname copy.
    pub hostname: usize,
    /// Alias array: a single null pointer, the broker reports no aliases.
    pub aliases: usize,
    /// The four address bytes, network order.
    pub addr: usize,
    /// Address pointer array: the address above, then a null terminator.
    pub addr_list: usize,
    /// Total bytes the shape occupies.
    pub required: usize,
}

impl EntryLayout {
    /// Computes placement for a hostname of `hostname_len` bytes, the NUL
    /// terminator excluded.
    pub fn new(hostname_len: usize) -> Self {
        let hostname = 0;
        let aliases = align_up(hostname_len + 1, PTR_SIZE);
        let addr = aliases + PTR_SIZE;
        let addr_list = align_up(addr + ADDR_LEN, PTR_SIZE);
        let required = addr_list + 2 * PTR_SIZE;

        Self {
            hostname,
            aliases,
            addr,
            addr_list,
            required,
        }
    }
}

/// Offsets of the structures [`pack_tuple`] placed in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedTuple {
    pub hostname: usize,
    pub tuple: usize,
}

/// Offsets of the structures [`pack_entry`] placed in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedEntry {
    pub hostname: usize,
    pub aliases: usize,
    pub addr: usize,
    pub addr_list: usize,
}

fn check(required: usize, buf: &[u8]) -> Result<(), PackError> {
    if buf.as_ptr() as usize % PTR_SIZE != 0 {
        return Err(PackError::MisalignedBuffer);
    }
    if buf.len() < required {
        return Err(PackError::BufferTooSmall {
            required,
            capacity: buf.len(),
        });
    }

    Ok(())
}

/// Packs `hostname` and `ip` into `buf` in the tuple shape.
///
/// On success the buffer holds the NUL-terminated hostname copy followed by
/// an initialized [`GaihAddrtuple`] whose `name` points back at the copy.
/// Packing is a pure function of its inputs: repeating a call rewrites the
/// same bytes.
pub fn pack_tuple(hostname: &[u8], ip: Ipv4Addr, buf: &mut [u8]) -> Result<PackedTuple, PackError> {
    let layout = TupleLayout::new(hostname.len());
    check(layout.required, buf)?;

    buf[layout.hostname..layout.hostname + hostname.len()].copy_from_slice(hostname);
    buf[layout.hostname + hostname.len()] = 0;

    let base = buf.as_mut_ptr();
    // SAFETY: `check` verified capacity and base alignment, and `tuple` is a
    // pointer-aligned offset, so the write stays inside `buf` and is aligned.
    unsafe {
        base.add(layout.tuple).cast::<GaihAddrtuple>().write(GaihAddrtuple {
            next: ptr::null_mut(),
            name: base.add(layout.hostname).cast::<c_char>(),
            family: libc::AF_INET,
            addr: [u32::from_ne_bytes(ip.octets()), 0, 0, 0],
            scopeid: 0,
        });
    }

    Ok(PackedTuple {
        hostname: layout.hostname,
        tuple: layout.tuple,
    })
}

/// Packs `hostname` and `ip` into `buf` in the entry shape.
///
/// The `struct hostent` itself is caller-owned storage outside the buffer;
/// this fills everything its fields point at. The alias array is a lone
/// null terminator and the address array carries exactly one address.
pub fn pack_entry(hostname: &[u8], ip: Ipv4Addr, buf: &mut [u8]) -> Result<PackedEntry, PackError> {
    let layout = EntryLayout::new(hostname.len());
    check(layout.required, buf)?;

    buf[layout.hostname..layout.hostname + hostname.len()].copy_from_slice(hostname);
    buf[layout.hostname + hostname.len()] = 0;
    buf[layout.addr..layout.addr + ADDR_LEN].copy_from_slice(&ip.octets());

    let base = buf.as_mut_ptr();
    // SAFETY: `check` verified capacity and base alignment; `aliases` and
    // `addr_list` are pointer-aligned offsets with one and two pointer slots
    // inside `buf` respectively.
    unsafe {
        base.add(layout.aliases).cast::<*mut c_char>().write(ptr::null_mut());

        let list = base.add(layout.addr_list).cast::<*mut c_char>();
        list.write(base.add(layout.addr).cast::<c_char>());
        list.add(1).write(ptr::null_mut());
    }

    Ok(PackedEntry {
        hostname: layout.hostname,
        aliases: layout.aliases,
        addr: layout.addr,
        addr_list: layout.addr_list,
    })
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    /// Pointer-aligned buffer, the way glibc's malloc'd scratch space is.
    #[repr(C, align(8))]
    struct Aligned<const N: usize>([u8; N]);

    impl<const N: usize> Aligned<N> {
        fn filled(byte: u8) -> Self {
            Self([byte; N])
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn required_sizes() {
        // "foo" rounds to 8 bytes with its terminator; the tuple struct is
        // 40 bytes, the entry scaffolding 32.
        assert_eq!(TupleLayout::new(3).required, 48);
        assert_eq!(EntryLayout::new(3).required, 40);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::short(3)]
    #[case::unpadded(7)]
    #[case::padded(8)]
    #[case::long(63)]
    fn offsets_are_pointer_aligned(#[case] len: usize) {
        let tuple = TupleLayout::new(len);
        assert_eq!(tuple.tuple % PTR_SIZE, 0);
        assert!(tuple.tuple > len);
        assert_eq!(tuple.required % PTR_SIZE, 0);

        let entry = EntryLayout::new(len);
        for offset in [entry.aliases, entry.addr_list, entry.required] {
            assert_eq!(offset % PTR_SIZE, 0);
        }
        assert!(entry.aliases > len);
        assert!(entry.addr >= entry.aliases + PTR_SIZE);
        assert!(entry.addr_list >= entry.addr + ADDR_LEN);
    }

    #[test]
    fn tuple_packs_loopback() {
        let mut buf = Aligned::<64>::filled(0);
        let packed = pack_tuple(b"foo", Ipv4Addr::new(127, 0, 0, 1), &mut buf.0).unwrap();

        assert_eq!(&buf.0[..4], b"foo\0");

        let base = buf.0.as_ptr();
        // SAFETY: pack_tuple initialized a tuple at this offset.
        let tuple = unsafe { &*base.add(packed.tuple).cast::<GaihAddrtuple>() };
        assert!(tuple.next.is_null());
        assert_eq!(tuple.name, base.cast_mut().cast::<c_char>());
        assert_eq!(tuple.family, libc::AF_INET);
        assert_eq!(tuple.addr[0], u32::from_ne_bytes([127, 0, 0, 1]));
        assert_eq!(tuple.addr[1..], [0, 0, 0]);
        assert_eq!(tuple.scopeid, 0);
    }

    #[test]
    fn entry_packs_all_four_regions() {
        let mut buf = Aligned::<64>::filled(0);
        let ip = Ipv4Addr::new(10, 11, 12, 13);
        let packed = pack_entry(b"db.internal", ip, &mut buf.0).unwrap();

        assert_eq!(&buf.0[..12], b"db.internal\0");
        assert_eq!(&buf.0[packed.addr..packed.addr + ADDR_LEN], &ip.octets());

        let base = buf.0.as_ptr();
        // SAFETY: pack_entry initialized one pointer slot at `aliases` and
        // two at `addr_list`.
        unsafe {
            let aliases = base.add(packed.aliases).cast::<*mut c_char>();
            assert!((*aliases).is_null());

            let list = base.add(packed.addr_list).cast::<*mut c_char>();
            assert_eq!(*list, base.add(packed.addr).cast_mut().cast::<c_char>());
            assert!((*list.add(1)).is_null());
        }
    }

    #[test]
    fn every_offset_stays_inside_the_buffer() {
        let mut buf = Aligned::<128>::filled(0);
        let packed = pack_entry(b"a.rather.long.hostname.example", Ipv4Addr::LOCALHOST, &mut buf.0)
            .unwrap();

        let capacity = buf.0.len();
        assert!(packed.hostname < capacity);
        assert!(packed.aliases + PTR_SIZE <= capacity);
        assert!(packed.addr + ADDR_LEN <= capacity);
        assert!(packed.addr_list + 2 * PTR_SIZE <= capacity);
    }

    #[test]
    fn too_small_buffer_is_left_untouched() {
        let mut buf = Aligned::<4>::filled(0xAA);
        let result = pack_tuple(b"foo", Ipv4Addr::LOCALHOST, &mut buf.0);

        assert_eq!(
            result,
            Err(PackError::BufferTooSmall {
                required: TupleLayout::new(3).required,
                capacity: 4,
            })
        );
        assert_eq!(buf.0, [0xAA; 4]);
    }

    #[test]
    fn exact_fit_succeeds_one_byte_short_does_not() {
        let required = EntryLayout::new(3).required;
        let mut buf = Aligned::<256>::filled(0);

        assert!(pack_entry(b"foo", Ipv4Addr::LOCALHOST, &mut buf.0[..required]).is_ok());
        assert_eq!(
            pack_entry(b"foo", Ipv4Addr::LOCALHOST, &mut buf.0[..required - 1]),
            Err(PackError::BufferTooSmall {
                required,
                capacity: required - 1,
            })
        );
    }

    #[test]
    fn misaligned_buffer_is_rejected_untouched() {
        let mut buf = Aligned::<72>::filled(0xAA);
        let result = pack_tuple(b"foo", Ipv4Addr::LOCALHOST, &mut buf.0[1..]);

        assert_eq!(result, Err(PackError::MisalignedBuffer));
        assert_eq!(buf.0, [0xAA; 72]);
    }

    #[test]
    fn repacking_rewrites_identical_bytes() {
        let mut buf = Aligned::<64>::filled(0);
        let ip = Ipv4Addr::new(198, 51, 100, 7);

        let first = pack_tuple(b"cache", ip, &mut buf.0).unwrap();
        let snapshot = buf.0;
        let second = pack_tuple(b"cache", ip, &mut buf.0).unwrap();

        assert_eq!(first, second);
        assert_eq!(buf.0, snapshot);
    }
}
