//! RAR (CBR) member access through libunrar.

use super::{Member, MemberSource};
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// RAR archive handle.
///
/// libunrar works on paths and streams headers sequentially, so the handle
/// only keeps the path and reopens the archive per operation.
pub struct RarSource {
    path: PathBuf,
}

impl RarSource {
    /// Open a RAR archive from path.
    pub fn open(path: &Path) -> Result<Self> {
        // Surface missing files as I/O errors rather than libunrar codes.
        std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

fn member_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl MemberSource for RarSource {
    fn members(&mut self) -> Result<Vec<Member>> {
        let listing = unrar::Archive::new(&self.path).open_for_listing()?;

        let mut members = Vec::new();
        for header in listing {
            let header = header?;
            members.push(Member {
                name: member_name(&header.filename),
                is_dir: header.is_directory(),
            });
        }

        Ok(members)
    }

    fn read_member(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut archive = unrar::Archive::new(&self.path).open_for_processing()?;

        while let Some(header) = archive.read_header()? {
            archive = if member_name(&header.entry().filename) == path {
                let (data, _) = header.read()?;
                return Ok(data);
            } else {
                header.skip()?
            };
        }

        Err(AppError::MemberNotFound(path.to_string()))
    }
}
