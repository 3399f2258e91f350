//! Fixed-capacity byte buffer with typed accessors.
//!
//! Layout of the typed fields:
//! - integer: 4 bytes, big-endian
//! - byte blob: 4 byte length prefix followed by the raw bytes
//! - string: UTF-16 code units, 2 bytes each, followed by a 2 byte zero sentinel
//!
//! Strings cannot contain U+0000 since it is indistinguishable from the sentinel.
//! Every accessor checks `offset + width <= capacity` and fails without touching the
//! buffer if it does not hold.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("field of {width} bytes at offset {offset} exceeds page capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        capacity: usize,
    },

    #[error("string contains the NUL terminator character")]
    EmbeddedTerminator,

    #[error("string at offset {0} is not valid UTF-16")]
    InvalidString(usize),
}

/// The page struct that contains the contents of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    contents: Vec<u8>,
}

impl Page {
    pub const INT_BYTES: usize = 4;
    pub const CHAR_BYTES: usize = 2;

    pub fn new(blocksize: usize) -> Self {
        Self {
            contents: vec![0; blocksize],
        }
    }

    /// Create a new page from the given bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { contents: bytes }
    }

    pub fn capacity(&self) -> usize {
        self.contents.len()
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub(crate) fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.contents
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.contents
    }

    /// The number of bytes needed to store a string of `char_count` UTF-16 code units
    pub fn max_length(char_count: usize) -> usize {
        (char_count + 1) * Self::CHAR_BYTES
    }

    fn check(&self, offset: usize, width: usize) -> Result<(), PageError> {
        match offset.checked_add(width) {
            Some(end) if end <= self.contents.len() => Ok(()),
            _ => Err(PageError::OutOfBounds {
                offset,
                width,
                capacity: self.contents.len(),
            }),
        }
    }

    /// Get an integer from the page at the given offset
    pub fn get_int(&self, offset: usize) -> Result<i32, PageError> {
        self.check(offset, Self::INT_BYTES)?;
        let mut bytes = [0; Self::INT_BYTES];
        bytes.copy_from_slice(&self.contents[offset..offset + Self::INT_BYTES]);
        Ok(i32::from_be_bytes(bytes))
    }

    /// Set an integer at the given offset
    pub fn set_int(&mut self, offset: usize, n: i32) -> Result<(), PageError> {
        self.check(offset, Self::INT_BYTES)?;
        self.contents[offset..offset + Self::INT_BYTES].copy_from_slice(&n.to_be_bytes());
        Ok(())
    }

    /// Get a slice of bytes from the page at the given offset. Read the length and then the bytes
    pub fn get_bytes(&self, offset: usize) -> Result<Vec<u8>, PageError> {
        let length = self.get_int(offset)? as u32 as usize;
        let start = offset + Self::INT_BYTES;
        self.check(start, length)?;
        Ok(self.contents[start..start + length].to_vec())
    }

    /// Set a slice of bytes at the given offset. Write the length and then the bytes
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), PageError> {
        let width = Self::INT_BYTES
            .checked_add(bytes.len())
            .ok_or(PageError::OutOfBounds {
                offset,
                width: usize::MAX,
                capacity: self.contents.len(),
            })?;
        self.check(offset, width)?;
        let start = offset + Self::INT_BYTES;
        self.contents[offset..start].copy_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.contents[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Get a string from the page at the given offset
    pub fn get_string(&self, offset: usize) -> Result<String, PageError> {
        let mut units = Vec::new();
        let mut pos = offset;
        loop {
            self.check(pos, Self::CHAR_BYTES)?;
            let unit = u16::from_be_bytes([self.contents[pos], self.contents[pos + 1]]);
            if unit == 0 {
                break;
            }
            units.push(unit);
            pos += Self::CHAR_BYTES;
        }
        String::from_utf16(&units).map_err(|_| PageError::InvalidString(offset))
    }

    /// Set a string at the given offset
    pub fn set_string(&mut self, offset: usize, string: &str) -> Result<(), PageError> {
        let units = self.check_string_fits(offset, string)?;
        let mut pos = offset;
        for unit in units.into_iter().chain(std::iter::once(0)) {
            self.contents[pos..pos + Self::CHAR_BYTES].copy_from_slice(&unit.to_be_bytes());
            pos += Self::CHAR_BYTES;
        }
        Ok(())
    }

    /// Validate that `string` can be written at `offset` and return its encoded code units
    pub fn check_string_fits(&self, offset: usize, string: &str) -> Result<Vec<u16>, PageError> {
        if string.contains('\0') {
            return Err(PageError::EmbeddedTerminator);
        }
        let units: Vec<u16> = string.encode_utf16().collect();
        self.check(offset, Self::max_length(units.len()))?;
        Ok(units)
    }
}
