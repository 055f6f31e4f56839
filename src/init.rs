//! Project initialization for goalify
//!
//! `goalify init` creates the `.goalify/` directory with a default config
//! and an empty database

use crate::config::Config;
use crate::db::{Database, CURRENT_SCHEMA};
use colored::Colorize;
use std::fs;
use std::path::Path;

/// Initialize goalify in `root`
pub fn init_project(root: &Path) -> Result<(), String> {
    println!("\n{}", "Initializing Goalify...".cyan().bold());
    println!("   Directory: {}\n", root.display());

    // 1. Create .goalify directory
    let goalify_dir = root.join(".goalify");
    create_dir_if_missing(&goalify_dir)?;

    // 2. Write the default config
    let config_path = goalify_dir.join("config.toml");
    let config = toml::to_string_pretty(&Config::default())
        .map_err(|e| format!("Could not render config.toml: {}", e))?;
    write_file_if_missing(&config_path, &config, ".goalify/config.toml")?;

    // 3. Create the database (opening it bootstraps the tables)
    let db_path = goalify_dir.join("goalify.db");
    let existed = db_path.exists();
    Database::open_at(&db_path).map_err(|e| format!("Could not create database: {}", e))?;
    if existed {
        println!("   {} .goalify/goalify.db (already exists)", "Skipping".yellow());
    } else {
        println!("   {} .goalify/goalify.db", "Creating".green());
    }

    // 4. Keep the database out of version control
    add_to_gitignore(root)?;

    println!("\n{} schema {}", "Goalify initialized!".green().bold(), CURRENT_SCHEMA);
    println!("\nNext steps:");
    println!("  1. Edit {} to pick the progress aggregation", ".goalify/config.toml".cyan());
    println!("  2. Run {} to start the API", "goalify serve".cyan());
    println!();

    Ok(())
}

fn create_dir_if_missing(path: &Path) -> Result<(), String> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Could not create {}: {}", path.display(), e))?;
        println!("   {} {}", "Creating".green(), path.display());
    }
    Ok(())
}

fn write_file_if_missing(path: &Path, content: &str, display_name: &str) -> Result<(), String> {
    if path.exists() {
        println!("   {} {} (already exists)", "Skipping".yellow(), display_name);
    } else {
        fs::write(path, content)
            .map_err(|e| format!("Could not write {}: {}", display_name, e))?;
        println!("   {} {}", "Creating".green(), display_name);
    }
    Ok(())
}

fn add_to_gitignore(root: &Path) -> Result<(), String> {
    let gitignore_path = root.join(".gitignore");
    let entry = ".goalify/goalify.db";

    if gitignore_path.exists() {
        let existing = fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Could not read .gitignore: {}", e))?;

        if existing.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }

        let new_content = format!("{}\n\n# Goalify database (local)\n{}\n", existing.trim_end(), entry);
        fs::write(&gitignore_path, new_content)
            .map_err(|e| format!("Could not update .gitignore: {}", e))?;
        println!("   {} .gitignore (added {})", "Updated".green(), entry);
    } else {
        let content = format!("# Goalify database (local)\n{}\n", entry);
        fs::write(&gitignore_path, content)
            .map_err(|e| format!("Could not create .gitignore: {}", e))?;
        println!("   {} .gitignore", "Creating".green());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_layout() {
        let dir = TempDir::new().unwrap();
        init_project(dir.path()).unwrap();

        let config = fs::read_to_string(dir.path().join(".goalify/config.toml")).unwrap();
        let parsed = Config::from_toml_str(&config).unwrap();
        assert_eq!(parsed.server.port, 8000);

        assert!(dir.path().join(".goalify/goalify.db").exists());
        let ignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(ignore.contains(".goalify/goalify.db"));
    }

    #[test]
    fn test_init_is_repeatable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        init_project(dir.path()).unwrap();
        init_project(dir.path()).unwrap();

        let ignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(ignore.matches(".goalify/goalify.db").count(), 1);
        assert!(ignore.starts_with("target/"));
    }
}
