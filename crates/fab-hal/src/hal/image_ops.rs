//! Firmware/certificate image lookup.

use crate::HalResult;
use std::path::{Path, PathBuf};

pub trait ImageOps {
    /// Find the first `*.bin` file under `dir` (recursive, sorted by name) whose
    /// file name contains `keyword`.
    fn locate_image(&self, dir: &Path, keyword: &str) -> HalResult<Option<PathBuf>>;
}
