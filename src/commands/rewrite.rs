//! `rewrite`: populate the staging root and stop there.

use anyhow::Result;
use tracing::info;

use crate::cli::CommonOpts;
use crate::fsutil::rewrite_root;
use crate::materialize;

pub fn run(args: &[String], common: &CommonOpts, verbose: u8) -> Result<()> {
    let opts = super::gen_options(common, verbose, false)?;
    let root = rewrite_root();
    let res = materialize::gen_rewrite(args, &root, &opts)?;
    info!(
        root = %root.display(),
        project = %res.staged_project_dir.display(),
        rewritten = res.rewritten_files,
        mocks = res.mock_files,
        "rewrite complete"
    );
    Ok(())
}
