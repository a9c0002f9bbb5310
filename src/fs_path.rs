// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Filesystem odds and ends shared by the modes.

use std::path::PathBuf;

use miette::{Context, IntoDiagnostic};

/// Per-process scratch directory handed to the wireless stack as its user
/// path. The control core keeps no state of its own on disk, so an ephemeral
/// directory per invocation is all the stack gets.
pub fn try_create_user_path() -> miette::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("exhale-{}", std::process::id()));
    std::fs::create_dir_all(&path)
        .into_diagnostic()
        .wrap_err_with(|| format!("creating user path {}", path.display()))?;
    Ok(path)
}
