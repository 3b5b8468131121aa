//! `icswatch init`: write the default configuration and notification
//! templates. Existing files are never overwritten.

use std::fs;

use anyhow::{Context, Result};
use icswatch_core::config::{self, Config};

/// Built-in templates seeded into the user's config directory. Rendering
/// substitutes `{field}` placeholders; see the notifier for the field
/// list.
const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "default.tpl",
        "{summary}\nStarts: {start_time} ({offset} warning)\n",
    ),
    (
        "detailed.tpl",
        "{summary}\n{start_time} - {end_time} ({duration})\nLocation: {location}\n{description}\n\n{offset} warning\n",
    ),
    ("minimal.tpl", "{summary} at {start_time}\n"),
];

pub fn run() -> Result<()> {
    let (config_path, created) =
        Config::write_default().context("failed to write default configuration")?;
    if created {
        println!("Created default configuration at: {}", config_path.display());
    } else {
        println!(
            "Configuration already exists at: {} (left untouched)",
            config_path.display()
        );
    }

    let templates_dir =
        config::templates_dir().context("could not determine the templates directory")?;
    fs::create_dir_all(&templates_dir).with_context(|| {
        format!(
            "failed to create templates directory {}",
            templates_dir.display()
        )
    })?;

    for (name, content) in DEFAULT_TEMPLATES {
        let path = templates_dir.join(name);
        if path.exists() {
            continue;
        }
        fs::write(&path, content)
            .with_context(|| format!("failed to write template {}", path.display()))?;
        println!("Created template: {}", path.display());
    }

    println!("\nEdit the configuration, then start the daemon with `icswatch run`.");
    Ok(())
}
