//! `print`: rewrite a single file and show the outcome on stdout.

use std::path::Path;

use anyhow::{anyhow, Result};

use crate::cli::CommonOpts;
use crate::loader::{self, LoadOptions};
use crate::rewrite;

pub fn run(
    file: &Path,
    print_rewrite: bool,
    print_mock: bool,
    common: &CommonOpts,
    verbose: u8,
) -> Result<()> {
    let opts = super::gen_options(common, verbose, false)?;
    let abs = crate::fsutil::absolutize(file)?;

    let load_opts = LoadOptions {
        project_dir: opts.project_dir.clone(),
        for_test: false,
        build_flags: Vec::new(),
    };
    let loaded = loader::load_packages(&[abs.to_string_lossy().into_owned()], &load_opts)?;

    let pkg = loaded
        .packages
        .iter()
        .find(|p| p.files.iter().any(|f| f.path == abs))
        .ok_or_else(|| anyhow!("{} is not part of the loaded module", abs.display()))?;

    let Some(res) = rewrite::rewrite_package(pkg, &opts.rewrite)? else {
        println!("// no function trapped in {}", abs.display());
        return Ok(());
    };

    if print_rewrite {
        for file_res in &res.files {
            if file_res.orig_file == abs {
                println!("{}", file_res.content);
            }
        }
    }
    if print_mock && !opts.skip_gen_mock {
        println!("{}", res.mock_content);
    }
    Ok(())
}
