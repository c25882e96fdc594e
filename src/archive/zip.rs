//! ZIP (CBZ) member access with a CP437 fallback for legacy entry names.

use super::{Member, MemberSource};
use crate::error::{AppError, Result};
use ::zip::ZipArchive;
use ::zip::result::ZipError;
use oem_cp::code_table::DECODING_TABLE_CP437;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// ZIP archive handle.
pub struct ZipSource {
    archive: ZipArchive<BufReader<File>>,
}

impl ZipSource {
    /// Open a ZIP archive from path.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(BufReader::new(file))?;
        Ok(Self { archive })
    }

    /// Find the first entry whose name is not valid UTF-8 and decodes from
    /// CP437 to `path`.
    ///
    /// Entries with well-formed UTF-8 names are never considered.
    pub fn find_legacy_index(&mut self, path: &str) -> Result<Option<usize>> {
        for index in 0..self.archive.len() {
            let file = self.archive.by_index_raw(index)?;
            let raw = file.name_raw();
            if std::str::from_utf8(raw).is_ok() {
                continue;
            }

            let decoded = oem_cp::decode_string_complete_table(raw, &DECODING_TABLE_CP437);
            if normalize(&decoded) == path {
                return Ok(Some(index));
            }
        }

        Ok(None)
    }

    /// Find the entry stored with `\\` separators whose listed name is `path`.
    fn find_separator_index(&mut self, path: &str) -> Result<Option<usize>> {
        for index in 0..self.archive.len() {
            let file = self.archive.by_index_raw(index)?;
            if file.name().contains('\\') && normalize(file.name()) == path {
                return Ok(Some(index));
            }
        }

        Ok(None)
    }
}

/// Member names use `/` regardless of the tool that built the archive.
fn normalize(name: &str) -> String {
    name.replace('\\', "/")
}

impl MemberSource for ZipSource {
    fn members(&mut self) -> Result<Vec<Member>> {
        let mut members = Vec::with_capacity(self.archive.len());

        for index in 0..self.archive.len() {
            let file = self.archive.by_index_raw(index)?;
            members.push(Member {
                name: normalize(file.name()),
                is_dir: file.is_dir(),
            });
        }

        Ok(members)
    }

    fn read_member(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();

        match self.archive.by_name(path) {
            Ok(mut file) => {
                file.read_to_end(&mut data)?;
                return Ok(data);
            }
            Err(ZipError::FileNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        // The name index only knows stored names. Listed names may differ by
        // separator, or by code page for legacy entries.
        let index = match self.find_separator_index(path)? {
            Some(index) => index,
            None => self
                .find_legacy_index(path)?
                .ok_or_else(|| AppError::MemberNotFound(path.to_string()))?,
        };

        tracing::debug!(member = path, index, "Resolved member by its listed name");
        self.archive.by_index(index)?.read_to_end(&mut data)?;
        Ok(data)
    }
}
