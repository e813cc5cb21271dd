//! DDS header synthesis for BA2 texture entries
//!
//! BA2 texture entries store pixel data without the DDS header. Readers
//! rebuild it from the entry's dimensions, mip count, and DXGI format;
//! builders strip it again using [`header_size_for_format`].

use binrw::{BinRead, BinWrite};
use std::io::Cursor;
use thiserror::Error;

/// `"DDS "` file magic
pub const DDS_MAGIC: [u8; 4] = *b"DDS ";

/// Size of the base header, not counting the magic
pub const DDS_HEADER_SIZE: u32 = 124;

/// Size of the DX10 extension header
pub const DX10_HEADER_SIZE: u32 = 20;

/// Pixel format size field
const PIXEL_FORMAT_SIZE: u32 = 32;

const DDSD_TEXTURE: u32 = 0x0000_1007;
const DDSD_MIPMAPCOUNT: u32 = 0x0002_0000;
const DDSD_LINEARSIZE: u32 = 0x0008_0000;

const DDSCAPS_TEXTURE: u32 = 0x0000_1000;
const DDSCAPS_COMPLEX_MIPMAP: u32 = 0x0040_0008;

const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDPF_RGBA: u32 = 0x41;

const DIMENSION_TEXTURE2D: u32 = 3;

/// DDS synthesis errors
#[derive(Debug, Error)]
pub enum DdsError {
    /// The DXGI format has no header recipe
    #[error("unsupported DXGI format {0}")]
    UnsupportedFormat(u8),

    /// Header serialization failed
    #[error("DDS header write failed: {0}")]
    BinRw(#[from] binrw::Error),
}

/// DXGI formats that BA2 textures use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DxgiFormat {
    R8G8B8A8Unorm = 28,
    R8G8B8A8UnormSrgb = 29,
    R8Unorm = 61,
    Bc1Unorm = 71,
    Bc1UnormSrgb = 72,
    Bc2Unorm = 74,
    Bc3Unorm = 77,
    Bc3UnormSrgb = 78,
    Bc4Unorm = 80,
    Bc5Unorm = 83,
    Bc5Snorm = 84,
    B8G8R8A8Unorm = 87,
    B8G8R8X8Unorm = 88,
    Bc6hUf16 = 95,
    Bc7Unorm = 98,
    Bc7UnormSrgb = 99,
}

impl DxgiFormat {
    /// Parse a raw format byte
    pub fn from_raw(value: u8) -> Option<Self> {
        Some(match value {
            28 => Self::R8G8B8A8Unorm,
            29 => Self::R8G8B8A8UnormSrgb,
            61 => Self::R8Unorm,
            71 => Self::Bc1Unorm,
            72 => Self::Bc1UnormSrgb,
            74 => Self::Bc2Unorm,
            77 => Self::Bc3Unorm,
            78 => Self::Bc3UnormSrgb,
            80 => Self::Bc4Unorm,
            83 => Self::Bc5Unorm,
            84 => Self::Bc5Snorm,
            87 => Self::B8G8R8A8Unorm,
            88 => Self::B8G8R8X8Unorm,
            95 => Self::Bc6hUf16,
            98 => Self::Bc7Unorm,
            99 => Self::Bc7UnormSrgb,
            _ => return None,
        })
    }

    /// Whether the header carries a DX10 extension
    pub fn needs_dx10(self) -> bool {
        matches!(
            self,
            Self::Bc1UnormSrgb
                | Self::Bc3UnormSrgb
                | Self::Bc4Unorm
                | Self::Bc5Snorm
                | Self::Bc6hUf16
                | Self::Bc7Unorm
                | Self::Bc7UnormSrgb
        )
    }
}

/// Header size for a raw format, excluding the 4-byte magic
///
/// `None` for formats without a header recipe.
pub fn header_size_for_format(format: u8) -> Option<u32> {
    let format = DxgiFormat::from_raw(format)?;
    Some(if format.needs_dx10() {
        DDS_HEADER_SIZE + DX10_HEADER_SIZE
    } else {
        DDS_HEADER_SIZE
    })
}

/// `DDS_PIXELFORMAT`
#[derive(Debug, Clone, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
#[allow(missing_docs)]
pub struct DdsPixelFormat {
    pub size: u32,
    pub flags: u32,
    pub four_cc: [u8; 4],
    pub rgb_bit_count: u32,
    pub r_mask: u32,
    pub g_mask: u32,
    pub b_mask: u32,
    pub a_mask: u32,
}

/// `DDS_HEADER` preceded by the file magic
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"DDS ")]
#[allow(missing_docs)]
pub struct DdsHeader {
    pub size: u32,
    pub flags: u32,
    pub height: u32,
    pub width: u32,
    pub pitch_or_linear_size: u32,
    pub depth: u32,
    pub mip_map_count: u32,
    pub reserved1: [u32; 11],
    pub pixel_format: DdsPixelFormat,
    pub caps: u32,
    pub caps2: u32,
    pub reserved2: [u32; 3],
}

/// `DDS_HEADER_DXT10`
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
#[allow(missing_docs)]
pub struct Dx10Header {
    pub dxgi_format: u32,
    pub resource_dimension: u32,
    pub misc_flag: u32,
    pub array_size: u32,
    pub misc_flags2: u32,
}

/// Texture description a DDS header is synthesized from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Raw DXGI format byte
    pub format: u8,
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
    /// Number of mip levels
    pub mip_count: u8,
}

fn four_cc_pixel_format(tag: &[u8; 4]) -> DdsPixelFormat {
    DdsPixelFormat {
        size: PIXEL_FORMAT_SIZE,
        flags: DDPF_FOURCC,
        four_cc: *tag,
        ..DdsPixelFormat::default()
    }
}

fn masked_pixel_format(flags: u32, bits: u32, masks: [u32; 4]) -> DdsPixelFormat {
    DdsPixelFormat {
        size: PIXEL_FORMAT_SIZE,
        flags,
        four_cc: [0; 4],
        rgb_bit_count: bits,
        r_mask: masks[0],
        g_mask: masks[1],
        b_mask: masks[2],
        a_mask: masks[3],
    }
}

/// Build the header structures for a texture
///
/// `use_ati_fourcc` selects `ATI2` over `DXT5` for BC5 textures.
pub fn build_header(
    texture: &TextureDescriptor,
    use_ati_fourcc: bool,
) -> Result<(DdsHeader, Option<Dx10Header>), DdsError> {
    let format =
        DxgiFormat::from_raw(texture.format).ok_or(DdsError::UnsupportedFormat(texture.format))?;
    let area = u64::from(texture.width) * u64::from(texture.height);

    let (pixel_format, pitch) = match format {
        DxgiFormat::Bc1Unorm => (four_cc_pixel_format(b"DXT1"), area / 2),
        DxgiFormat::Bc2Unorm => (four_cc_pixel_format(b"DXT3"), area),
        DxgiFormat::Bc3Unorm => (four_cc_pixel_format(b"DXT5"), area),
        DxgiFormat::Bc5Unorm => {
            let tag = if use_ati_fourcc { b"ATI2" } else { b"DXT5" };
            (four_cc_pixel_format(tag), area)
        }
        DxgiFormat::Bc1UnormSrgb => (four_cc_pixel_format(b"DX10"), area / 2),
        DxgiFormat::Bc3UnormSrgb
        | DxgiFormat::Bc6hUf16
        | DxgiFormat::Bc4Unorm
        | DxgiFormat::Bc5Snorm
        | DxgiFormat::Bc7Unorm
        | DxgiFormat::Bc7UnormSrgb => (four_cc_pixel_format(b"DX10"), area),
        DxgiFormat::R8G8B8A8Unorm | DxgiFormat::R8G8B8A8UnormSrgb => (
            masked_pixel_format(DDPF_RGBA, 32, [0xFF, 0xFF00, 0xFF_0000, 0xFF00_0000]),
            area * 4,
        ),
        DxgiFormat::B8G8R8A8Unorm | DxgiFormat::B8G8R8X8Unorm => (
            masked_pixel_format(DDPF_RGBA, 32, [0xFF_0000, 0xFF00, 0xFF, 0xFF00_0000]),
            area * 4,
        ),
        DxgiFormat::R8Unorm => (masked_pixel_format(DDPF_RGB, 8, [0xFF, 0, 0, 0]), area),
    };

    let header = DdsHeader {
        size: DDS_HEADER_SIZE,
        flags: DDSD_TEXTURE | DDSD_LINEARSIZE | DDSD_MIPMAPCOUNT,
        height: u32::from(texture.height),
        width: u32::from(texture.width),
        pitch_or_linear_size: pitch as u32,
        depth: 0,
        mip_map_count: u32::from(texture.mip_count),
        reserved1: [0; 11],
        pixel_format,
        caps: DDSCAPS_TEXTURE | DDSCAPS_COMPLEX_MIPMAP,
        caps2: 0,
        reserved2: [0; 3],
    };

    let dx10 = format.needs_dx10().then(|| Dx10Header {
        dxgi_format: u32::from(texture.format),
        resource_dimension: DIMENSION_TEXTURE2D,
        misc_flag: 0,
        array_size: 1,
        misc_flags2: 0,
    });

    Ok((header, dx10))
}

/// Serialize the full header (magic, base header, optional DX10 extension)
pub fn synthesize(texture: &TextureDescriptor, use_ati_fourcc: bool) -> Result<Vec<u8>, DdsError> {
    let (header, dx10) = build_header(texture, use_ati_fourcc)?;
    let mut out = Cursor::new(Vec::new());
    header.write(&mut out)?;
    if let Some(dx10) = dx10 {
        dx10.write(&mut out)?;
    }
    Ok(out.into_inner())
}
