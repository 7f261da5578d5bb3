// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decoding and encoding of the variable region.

use crate::EfiVariable;
use crate::Error;
use crate::Region;
use crate::MAX_VARIABLE_NAME_CHARS;
use guid::Guid;
use uefi_specs::edk2::variable_format::var_state;
use uefi_specs::edk2::variable_format::AUTHENTICATED_VARIABLE_HEADER;
use uefi_specs::edk2::variable_format::EFI_AUTHENTICATED_VARIABLE_GUID;
use uefi_specs::edk2::variable_format::EFI_VARIABLE_GUID;
use uefi_specs::edk2::variable_format::HEADER_ALIGNMENT;
use uefi_specs::edk2::variable_format::VARIABLE_DATA;
use uefi_specs::edk2::variable_format::VARIABLE_HEADER;
use uefi_specs::edk2::variable_format::VARIABLE_STORE_FORMATTED;
use uefi_specs::edk2::variable_format::VARIABLE_STORE_HEADER;
use uefi_specs::pi::firmware_volume::sum16;
use uefi_specs::pi::firmware_volume::EFI_FIRMWARE_VOLUME_HEADER;
use uefi_specs::pi::firmware_volume::EFI_FVH_REVISION;
use uefi_specs::pi::firmware_volume::EFI_FVH_SIGNATURE;
use uefi_specs::pi::firmware_volume::EFI_FV_BLOCK_MAP_ENTRY;
use uefi_specs::pi::firmware_volume::EFI_SYSTEM_NV_DATA_FV_GUID;
use uefi_specs::uefi::nvram::EfiVariableAttributes;
use uefi_specs::uefi::time::EFI_TIME;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

macro_rules! corrupt {
    ($($arg:tt)*) => {
        Error::Corrupt(format!($($arg)*))
    };
}

/// Validates the firmware volume and variable store headers, returning the
/// location of the variable region.
fn parse_headers(image: &[u8]) -> Result<Region, Error> {
    let (fvh, _) =
        EFI_FIRMWARE_VOLUME_HEADER::read_from_prefix(image).map_err(|_| Error::UnknownFormat)?;
    if fvh.signature != EFI_FVH_SIGNATURE {
        return Err(Error::UnknownFormat);
    }

    if fvh.file_system_guid != EFI_SYSTEM_NV_DATA_FV_GUID {
        return Err(corrupt!(
            "unexpected file system guid {}",
            fvh.file_system_guid
        ));
    }
    let fv_length = fvh.fv_length.get();
    if fv_length > image.len() as u64 {
        return Err(corrupt!(
            "volume length {fv_length:#x} exceeds image size {:#x}",
            image.len()
        ));
    }
    if fvh.reserved != 0 {
        return Err(corrupt!("reserved field is {:#x}", fvh.reserved));
    }
    if fvh.revision != EFI_FVH_REVISION {
        return Err(corrupt!("unsupported volume revision {}", fvh.revision));
    }
    if fvh.ext_header_offset != 0 {
        return Err(corrupt!("extended volume headers are not supported"));
    }

    // The block map runs up to the first zero entry.
    let header_length = fvh.header_length as usize;
    let mut offset = size_of::<EFI_FIRMWARE_VOLUME_HEADER>();
    loop {
        let (entry, _) = image
            .get(offset..)
            .and_then(|b| EFI_FV_BLOCK_MAP_ENTRY::read_from_prefix(b).ok())
            .ok_or_else(|| corrupt!("block map is not terminated"))?;
        offset += size_of::<EFI_FV_BLOCK_MAP_ENTRY>();
        if entry == EFI_FV_BLOCK_MAP_ENTRY::TERMINATOR {
            break;
        }
        if offset >= header_length {
            return Err(corrupt!("block map is not terminated"));
        }
    }
    if offset != header_length {
        return Err(corrupt!(
            "header length {header_length:#x} does not match block map end {offset:#x}"
        ));
    }
    if sum16(&image[..header_length]) != 0 {
        return Err(corrupt!("volume header checksum mismatch"));
    }

    let (vsh, _) = image
        .get(header_length..)
        .and_then(|b| VARIABLE_STORE_HEADER::read_from_prefix(b).ok())
        .ok_or_else(|| corrupt!("missing variable store header"))?;
    let authenticated = match vsh.signature {
        EFI_AUTHENTICATED_VARIABLE_GUID => true,
        EFI_VARIABLE_GUID => false,
        guid => return Err(corrupt!("unknown variable store signature {guid}")),
    };
    if vsh.format != VARIABLE_STORE_FORMATTED {
        return Err(corrupt!("variable store is not formatted ({:#x})", vsh.format));
    }

    let size = vsh.size as usize;
    if size < size_of::<VARIABLE_STORE_HEADER>() {
        return Err(corrupt!("variable store size {size:#x} is too small"));
    }
    let end = header_length + size;
    if end as u64 > fv_length {
        return Err(corrupt!(
            "variable store end {end:#x} exceeds volume length {fv_length:#x}"
        ));
    }

    Ok(Region {
        start: header_length + size_of::<VARIABLE_STORE_HEADER>(),
        end,
        authenticated,
    })
}

/// The fields shared by both header flavors.
struct Header {
    state: u8,
    attributes: u32,
    monotonic_count: u64,
    timestamp: EFI_TIME,
    pubkey_index: u32,
    name_size: usize,
    data_size: usize,
    vendor: Guid,
}

fn read_header(buf: &[u8], authenticated: bool) -> Option<Header> {
    let header = if authenticated {
        let (h, _) = AUTHENTICATED_VARIABLE_HEADER::read_from_prefix(buf).ok()?;
        Header {
            state: h.state,
            attributes: h.attributes,
            monotonic_count: h.monotonic_count.get(),
            timestamp: h.timestamp,
            pubkey_index: h.pub_key_index,
            name_size: h.name_size as usize,
            data_size: h.data_size as usize,
            vendor: h.vendor_guid,
        }
    } else {
        let (h, _) = VARIABLE_HEADER::read_from_prefix(buf).ok()?;
        Header {
            state: h.state,
            attributes: h.attributes,
            monotonic_count: 0,
            timestamp: EFI_TIME::ZEROED,
            pubkey_index: 0,
            name_size: h.name_size as usize,
            data_size: h.data_size as usize,
            vendor: h.vendor_guid,
        }
    };
    Some(header)
}

fn decode_name(raw: &[u8]) -> Result<String, Error> {
    let max = (MAX_VARIABLE_NAME_CHARS + 1) * 2;
    if raw.len() < 2 || raw.len() % 2 != 0 || raw.len() > max {
        return Err(corrupt!("invalid variable name size {}", raw.len()));
    }
    let (chars, nul) = raw.split_at(raw.len() - 2);
    if nul != [0, 0] {
        return Err(corrupt!("variable name is not terminated"));
    }
    let units = chars
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]));
    let name: String = char::decode_utf16(units)
        .collect::<Result<_, _>>()
        .map_err(|_| corrupt!("variable name is not valid UTF-16"))?;
    if name.is_empty() || name.contains('\0') {
        return Err(corrupt!("invalid variable name {name:?}"));
    }
    Ok(name)
}

/// Parses `image`, returning the region layout and every live variable.
pub(crate) fn parse_image(image: &[u8]) -> Result<(Region, Vec<EfiVariable>), Error> {
    let region = parse_headers(image)?;
    let header_size = region.header_size();
    let mut vars = Vec::new();

    let mut offset = region.start;
    while offset + 2 <= region.end {
        let start_id = u16::from_le_bytes([image[offset], image[offset + 1]]);
        if start_id != VARIABLE_DATA {
            offset += 2;
            continue;
        }

        let header = read_header(&image[offset..region.end], region.authenticated)
            .ok_or_else(|| corrupt!("truncated variable header at {offset:#x}"))?;
        let name_start = offset + header_size;
        let data_start = name_start + header.name_size;
        let data_end = data_start
            .checked_add(header.data_size)
            .filter(|&end| end <= region.end)
            .ok_or_else(|| corrupt!("variable at {offset:#x} runs past the store"))?;

        if header.state == var_state::VAR_ADDED {
            let name = decode_name(&image[name_start..data_start])?;
            tracing::trace!(
                name,
                vendor = %header.vendor,
                len = header.data_size,
                "found variable"
            );
            vars.push(EfiVariable {
                name,
                vendor: header.vendor,
                attributes: EfiVariableAttributes::from(header.attributes),
                monotonic_count: header.monotonic_count,
                timestamp: header.timestamp,
                pubkey_index: header.pubkey_index,
                data: image[data_start..data_end].to_vec(),
            });
        }
        offset = data_end.next_multiple_of(HEADER_ALIGNMENT);
    }

    Ok((region, vars))
}

/// Writes `var` at the start of `buf`, returning the number of bytes consumed
/// including alignment padding.
///
/// The caller has already checked that the variable fits.
pub(crate) fn write_variable(buf: &mut [u8], var: &EfiVariable, authenticated: bool) -> usize {
    let name = var.encoded_name();
    let attributes = u32::from(var.attributes);
    let header = if authenticated {
        AUTHENTICATED_VARIABLE_HEADER {
            start_id: VARIABLE_DATA,
            state: var_state::VAR_ADDED,
            reserved: 0,
            attributes,
            monotonic_count: var.monotonic_count.into(),
            timestamp: var.timestamp,
            pub_key_index: var.pubkey_index,
            name_size: name.len() as u32,
            data_size: var.data.len() as u32,
            vendor_guid: var.vendor,
        }
        .as_bytes()
        .to_vec()
    } else {
        VARIABLE_HEADER {
            start_id: VARIABLE_DATA,
            state: var_state::VAR_ADDED,
            reserved: 0,
            attributes,
            name_size: name.len() as u32,
            data_size: var.data.len() as u32,
            vendor_guid: var.vendor,
        }
        .as_bytes()
        .to_vec()
    };

    let mut offset = 0;
    for part in [header.as_slice(), name.as_slice(), var.data.as_slice()] {
        buf[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
    let aligned = offset.next_multiple_of(HEADER_ALIGNMENT);
    buf[offset..aligned].fill(0xff);
    aligned
}
