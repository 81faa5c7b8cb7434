//! `codecell templates` command implementation

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use crate::templates::{self, LANGUAGES};

#[derive(Args)]
pub struct TemplatesArgs {
    /// Directory to write into
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Language the templates are tailored to
    #[arg(short, long)]
    language: Option<String>,
}

pub fn run(args: TemplatesArgs) -> Result<()> {
    if let Some(lang) = &args.language {
        if templates::language_base_image(lang).is_none() {
            bail!(
                "Unknown language '{}' (expected one of: {})",
                lang,
                LANGUAGES.join(", ")
            );
        }
    }

    let written = templates::generate_templates(&args.dir, args.language.as_deref())?;
    if written.is_empty() {
        println!("Templates already present in {}", args.dir.display());
    }
    for path in &written {
        println!("✓ Wrote {}", path.display());
    }
    Ok(())
}
