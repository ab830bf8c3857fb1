//! Parse command - show the fields of an RPM filename

use crate::cli::args::{OutputFormat, ParseArgs};
use crate::error::CacheResult;
use crate::package::PackageKey;
use console::style;

/// Execute the parse command
pub fn execute(args: ParseArgs) -> CacheResult<()> {
    let key = PackageKey::parse(&args.filename)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&key)?),
        OutputFormat::Plain => println!(
            "{} {} {} {} {}",
            key.name, key.version, key.release, key.architecture, key.is_debuginfo
        ),
        OutputFormat::Table => {
            let kind = if key.is_source() {
                "source"
            } else if key.is_debuginfo {
                "debuginfo"
            } else {
                "binary"
            };
            println!("{:<14} {}", style("name").dim(), key.name);
            println!("{:<14} {}", style("version").dim(), key.version);
            println!("{:<14} {}", style("release").dim(), key.release);
            println!("{:<14} {}", style("architecture").dim(), key.architecture);
            println!("{:<14} {}", style("kind").dim(), kind);
        }
    }

    Ok(())
}
