// src/commands/options.rs

//! `dop options` - manage the option file

use super::open_recipe_dir;
use crate::error::Result;
use crate::profile::OptionSet;

pub fn run(clear: bool, print: bool, values: Vec<String>) -> Result<()> {
    let dir = open_recipe_dir()?;

    if clear {
        let path = dir.options_file();
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
        println!("Options cleared");
    }

    if !values.is_empty() {
        let mut overlay = OptionSet::new();
        for value in &values {
            overlay.set_from_arg(value)?;
        }
        dir.merge_option_file(&overlay)?;
    }

    if print || (values.is_empty() && !clear) {
        let options = dir.read_option_file()?.unwrap_or_default();
        if options.is_empty() {
            println!("No options set");
        } else {
            for (name, value) in &options.0 {
                println!("{name} = {value}");
            }
        }
    }
    Ok(())
}
