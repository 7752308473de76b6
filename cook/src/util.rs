// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{io, path::Path};

use tokio::fs::{create_dir_all, remove_dir_all};

/// Ensure every directory component of `path` exists, creating them if not.
pub async fn ensure_dir_exists(path: &Path) -> Result<(), io::Error> {
    if !path.exists() {
        create_dir_all(path).await?;
    }
    Ok(())
}

/// Remove `path` if it exists, then recreate it empty.
pub async fn recreate_dir(path: &Path) -> Result<(), io::Error> {
    if path.exists() {
        remove_dir_all(path).await?;
    }
    create_dir_all(path).await?;
    Ok(())
}

/// Remove `path` if it exists and is now empty. Non-empty directories
/// and missing paths are silently ignored, mirroring `rmdir`'s
/// best-effort cleanup of now-unused output directories.
pub fn remove_dir_if_empty(path: &Path) {
    let _ = std::fs::remove_dir(path);
}
