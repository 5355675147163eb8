//! Conteneur commun aux images et aux symboles.
//!
//! ```text
//! Header: MAGIC (6 bytes) + version u16 LE
//! [Section*]
//!   section = TAG[4] + len u32 LE + payload
//! Dernière section: "CRCC" + u32 (CRC32 sur tout après header)
//! ```

use kiln_core::{crc32_ieee, ByteReader, ByteWriter, CoreError, CoreResult, SectionTag};

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 8;

/// Assemble `header + sections + CRCC`.
pub(crate) fn write(magic: &[u8; 6], version: u16, sections: &[(SectionTag, Vec<u8>)]) -> CoreResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.write_bytes(magic);
    w.write_u16_le(version);
    for (tag, payload) in sections {
        w.write_section(*tag, payload)?;
    }
    let mut out = w.into_vec();
    let crc = crc32_ieee(&out[HEADER_LEN..]);
    out.extend_from_slice(&SectionTag::CRCC.to_be_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Découpe un conteneur en sections après vérification du magic, de la version et du CRC.
///
/// Les tags inconnus de ce lecteur sont rejetés par `read_tag` ; l'ordre des sections est libre.
pub(crate) fn read<'a>(data: &'a [u8], magic: &[u8; 6], version: u16) -> CoreResult<Vec<(SectionTag, &'a [u8])>> {
    let mut r = ByteReader::new(data);
    if r.read_bytes(6)? != magic {
        return Err(CoreError::InvalidMagic);
    }
    let found = r.read_u16_le()?;
    if found != version {
        return Err(CoreError::UnsupportedVersion { found });
    }

    let mut sections = Vec::new();
    loop {
        let tag = r.read_tag()?;
        if tag == SectionTag::CRCC {
            let expected = r.read_u32_le()?;
            if r.remaining() != 0 {
                return Err(CoreError::corrupted("trailing bytes after CRCC"));
            }
            let crc = crc32_ieee(&data[HEADER_LEN..data.len() - TRAILER_LEN]);
            if expected != crc {
                return Err(CoreError::corrupted("CRC32 mismatch"));
            }
            return Ok(sections);
        }
        let len = r.read_u32_le()? as usize;
        let payload = r.read_bytes(len).map_err(|_| CoreError::InvalidLength {
            section: Some(tag.name().into()),
            len: len as u64,
        })?;
        sections.push((tag, payload));
    }
}

/// Lit une liste `count u32 + éléments`.
pub(crate) fn read_list<T>(payload: &[u8], mut item: impl FnMut(&mut ByteReader<'_>) -> CoreResult<T>) -> CoreResult<Vec<T>> {
    let mut r = ByteReader::new(payload);
    let count = r.read_u32_le()? as usize;
    // borne grossière : chaque élément occupe au moins un octet
    if count > r.remaining() {
        return Err(CoreError::InvalidLength { section: None, len: count as u64 });
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(item(&mut r)?);
    }
    if r.remaining() != 0 {
        return Err(CoreError::corrupted("trailing bytes in section"));
    }
    Ok(out)
}

/// Écrit une liste `count u32 + éléments`.
pub(crate) fn write_list<T>(items: &[T], mut item: impl FnMut(&mut ByteWriter, &T) -> CoreResult<()>) -> CoreResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.write_len(items.len())?;
    for it in items {
        item(&mut w, it)?;
    }
    Ok(w.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &[u8; 6] = b"TESTC\0";

    #[test]
    fn crc_covers_sections() -> CoreResult<()> {
        let mut bytes = write(MAGIC, 1, &[(SectionTag::CODE, vec![1, 2, 3])])?;
        assert_eq!(read(&bytes, MAGIC, 1)?, vec![(SectionTag::CODE, &[1u8, 2, 3][..])]);

        bytes[HEADER_LEN + 8] ^= 0xFF;
        assert_eq!(read(&bytes, MAGIC, 1), Err(CoreError::corrupted("CRC32 mismatch")));
        Ok(())
    }

    #[test]
    fn header_checks() -> CoreResult<()> {
        let bytes = write(MAGIC, 3, &[])?;
        assert_eq!(read(&bytes, b"OTHER\0", 3), Err(CoreError::InvalidMagic));
        assert_eq!(read(&bytes, MAGIC, 1), Err(CoreError::UnsupportedVersion { found: 3 }));
        assert!(read(&bytes[..bytes.len() - 2], MAGIC, 3).is_err());
        Ok(())
    }
}
