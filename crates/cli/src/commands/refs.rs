//! `roundclaw refs`: offloaded tool results.

use std::path::Path;

use roundclaw_context::{REF_PREFIX, ReferenceStore};

use super::load_config;

pub fn list(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let refs = ReferenceStore::new(config.refs_dir());
    let ids = refs.list()?;
    if ids.is_empty() {
        println!("No references in {}", refs.dir().display());
    }
    for id in ids {
        println!("{REF_PREFIX}{id}");
    }
    Ok(())
}

pub fn show(config_path: Option<&Path>, reference: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let refs = ReferenceStore::new(config.refs_dir());
    print!("{}", resolve(&refs, reference)?);
    Ok(())
}

/// Accept a full `@refs/<id>` pointer or a bare id.
fn resolve(refs: &ReferenceStore, reference: &str) -> Result<String, Box<dyn std::error::Error>> {
    let reference = reference.trim();
    let content = if reference.starts_with(REF_PREFIX) {
        refs.load(reference)?
    } else {
        refs.load(&format!("{REF_PREFIX}{reference}"))?
    };
    Ok(content)
}
