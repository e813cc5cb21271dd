//! Filename hashes used by the BSA formats
//!
//! The folder/file-record format stores a 64-bit hash for every folder and
//! file and orders both by it. The legacy format stores a pair of 32-bit
//! hashes per file. Both are computed on lowercased names with `/` mapped
//! to `\`.

/// Multiplier of the rolling polynomial hash
const ROLLING_MULTIPLIER: u32 = 0x1003F;

/// Extensions that set extra bits in the low half of a file hash
const EXTENSION_FLAGS: [(&str, u32); 4] = [
    (".kf", 0x80),
    (".nif", 0x8000),
    (".dds", 0x8080),
    (".wav", 0x8000_0000),
];

fn rolling(units: &[u16]) -> u32 {
    units.iter().fold(0u32, |acc, &c| {
        acc.wrapping_mul(ROLLING_MULTIPLIER)
            .wrapping_add(u32::from(c as u8))
    })
}

/// Hash a name split into stem and extension (extension includes the dot)
pub fn bsa_hash(stem: &str, extension: &str) -> u64 {
    let name: Vec<u16> = stem.to_lowercase().encode_utf16().collect();
    let ext = extension.to_lowercase();

    let len = name.len();
    if len == 0 {
        return 0;
    }

    let seed = [
        name[len - 1] as u8,
        if len < 3 { 0 } else { name[len - 2] as u8 },
        len as u8,
        name[0] as u8,
    ];
    let mut low = u32::from_le_bytes(seed);
    if let Some((_, flag)) = EXTENSION_FLAGS.iter().find(|(e, _)| *e == ext) {
        low |= flag;
    }

    let interior = if len > 3 { rolling(&name[1..len - 2]) } else { 0 };
    let ext_units: Vec<u16> = ext.encode_utf16().collect();
    let high = interior.wrapping_add(rolling(&ext_units));

    (u64::from(high) << 32) + u64::from(low)
}

/// Hash of a file name; any leading folder components are ignored
pub fn bsa_file_hash(path: &str) -> u64 {
    let name = path.rsplit(['\\', '/']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) => bsa_hash(&name[..dot], &name[dot..]),
        None => bsa_hash(name, ""),
    }
}

/// Hash of a folder path; dots in folder names are not treated as extensions
pub fn bsa_folder_hash(folder: &str) -> u64 {
    bsa_hash(&folder.replace('/', "\\"), "")
}

/// The (hash1, hash2) pair the legacy format stores for a path
pub fn tes3_hash(path: &str) -> (u32, u32) {
    let bytes: Vec<u8> = path
        .bytes()
        .map(|b| match b {
            b'/' => b'\\',
            b if b.is_ascii() => b.to_ascii_lowercase(),
            _ => b'?',
        })
        .collect();
    let (first, second) = bytes.split_at(bytes.len() / 2);

    let mut low = [0u8; 4];
    for (i, &b) in first.iter().enumerate() {
        low[i % 4] ^= b;
    }

    let mut high = 0u32;
    for (i, &b) in second.iter().enumerate() {
        let temp = u32::from(b) << ((i % 4) << 3);
        high = (high ^ temp).rotate_right(temp & 0x1F);
    }

    (u32::from_le_bytes(low), high)
}

/// Combine a legacy hash pair into the 64-bit value readers expose
pub fn tes3_hash_u64(path: &str) -> u64 {
    let (low, high) = tes3_hash(path);
    u64::from(low) | (u64::from(high) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_do_not_overrun() {
        assert_eq!(bsa_file_hash("a"), 0x6101_0061);
        assert_eq!(bsa_file_hash("ab.kf"), 0x1711_E3E9_6102_00E2);
    }

    #[test]
    fn test_known_file_hashes() {
        assert_eq!(bsa_file_hash("test.nif"), 0x92CD_4662_7404_F374);
        assert_eq!(bsa_file_hash("x.wav"), 0x9733_CF9E_F801_0078);
        assert_eq!(bsa_file_hash("readme.txt"), 0xC7ED_DCEA_7206_6D65);
    }

    #[test]
    fn test_case_and_folder_insensitive() {
        assert_eq!(bsa_file_hash("Test.DDS"), 0x8DDB_AA2A_7404_F3F4);
        assert_eq!(
            bsa_file_hash("textures\\test.dds"),
            bsa_file_hash("TEST.dds")
        );
        assert_eq!(
            bsa_file_hash("textures/armor/Test.dds"),
            bsa_file_hash("test.dds")
        );
    }

    #[test]
    fn test_folder_hashes() {
        assert_eq!(bsa_folder_hash("Textures"), 0xD507_789E_7408_6573);
        assert_eq!(bsa_folder_hash("meshes\\armor"), 0xB6E5_BFE8_6D0C_6F72);
        assert_eq!(
            bsa_folder_hash("meshes/armor"),
            bsa_folder_hash("MESHES\\Armor")
        );
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(bsa_hash("", ".dds"), 0);
        assert_eq!(bsa_folder_hash(""), 0);
    }

    #[test]
    fn test_tes3_hash() {
        assert_eq!(tes3_hash("a"), (0, 0x8000_0030));
        assert_eq!(tes3_hash("meshes\\b.nif"), (0x6873_1608, 0xD4B7_7133));
        assert_eq!(tes3_hash("Meshes/B.NIF"), tes3_hash("meshes\\b.nif"));
        assert_eq!(tes3_hash("textures\\tx_a.dds"), (0x071D_1701, 0x02D4_797B));
        assert_eq!(tes3_hash_u64("a"), 0x8000_0030_0000_0000);
    }

    mod proptest_tests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn hash_is_deterministic(name in "[a-zA-Z0-9_]{0,24}(\\.[a-z]{1,4})?") {
                prop_assert_eq!(bsa_file_hash(&name), bsa_file_hash(&name));
            }

            #[test]
            fn hash_ignores_ascii_case(name in "[a-zA-Z0-9_]{1,24}\\.[a-zA-Z]{1,4}") {
                prop_assert_eq!(
                    bsa_file_hash(&name),
                    bsa_file_hash(&name.to_ascii_lowercase())
                );
            }

            #[test]
            fn low_byte_is_last_stem_char(stem in "[a-z]{1,24}", ext in "(\\.[a-z]{1,3})?") {
                let hash = bsa_hash(&stem, &ext);
                let last = *stem.as_bytes().last().unwrap_or(&0);
                // extension flags only ever touch bit 7 of the low byte
                prop_assert_eq!((hash & 0x7F) as u8, last & 0x7F);
                prop_assert_eq!(((hash >> 16) & 0xFF) as usize, stem.len());
            }

            #[test]
            fn tes3_hash_normalizes_separators(path in "[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
                prop_assert_eq!(tes3_hash(&path), tes3_hash(&path.replace('/', "\\")));
            }
        }
    }
}
